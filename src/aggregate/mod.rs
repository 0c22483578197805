//! Quarterly accumulation: quarter resolution, the sharded accumulator and
//! the consolidated result produced once ingestion has finished.

pub mod quarter;
pub mod shard;

use std::collections::HashMap;

use thiserror::Error;

use crate::ingest::{Pipeline, PipelineState};

use self::quarter::Quarter;
use self::shard::QuarterTotals;

/// Errors from consolidating the accumulator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("ingestion has not completed (pipeline state: {state})")]
    NotReady { state: PipelineState },
}

/// Totals per entity per quarter, merged from every shard.
///
/// Produced once after ingestion and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidated {
    totals: HashMap<u64, QuarterTotals>,
}

/// One line of the quarterly report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRow {
    pub entity: u64,
    pub quarter: Quarter,
    pub total: f64,
}

impl Consolidated {
    pub(crate) fn add(&mut self, entity: u64, quarter: Quarter, value: f64) {
        *self
            .totals
            .entry(entity)
            .or_default()
            .entry(quarter)
            .or_insert(0.0) += value;
    }

    /// Total for `(entity, quarter)`.
    pub fn get(&self, entity: u64, quarter: Quarter) -> Option<f64> {
        self.totals.get(&entity)?.get(&quarter).copied()
    }

    /// All quarter totals of one entity.
    pub fn entity(&self, entity: u64) -> Option<&QuarterTotals> {
        self.totals.get(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.totals.len()
    }

    /// Number of (entity, quarter) pairs.
    pub fn bucket_count(&self) -> usize {
        self.totals.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Rows sorted by entity, then by quarter label.
    pub fn rows(&self) -> Vec<ReportRow> {
        let mut rows: Vec<ReportRow> = self
            .totals
            .iter()
            .flat_map(|(entity, quarters)| {
                quarters.iter().map(move |(quarter, total)| ReportRow {
                    entity: *entity,
                    quarter: *quarter,
                    total: *total,
                })
            })
            .collect();
        rows.sort_unstable_by(|a, b| {
            a.entity
                .cmp(&b.entity)
                .then_with(|| a.quarter.cmp(&b.quarter))
        });
        rows
    }
}

/// Drains the pipeline's shard table once ingestion is done.
pub fn consolidate(pipeline: &Pipeline) -> Result<Consolidated, AggregateError> {
    match pipeline.state() {
        PipelineState::Done => Ok(pipeline.table().drain()),
        state => Err(AggregateError::NotReady { state }),
    }
}
