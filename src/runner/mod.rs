use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregate::shard::ShardTable;
use crate::aggregate::{self, AggregateError};
use crate::config::Config;
use crate::ingest::decode::RejectKind;
use crate::ingest::stats::IngestSummary;
use crate::ingest::{Pipeline, PipelineError};
use crate::report::{self, ReportError};

/// Fatal run failures. Any of these means no complete report was written.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub ingest: IngestSummary,
    pub entities: usize,
    /// Report rows written, one per (entity, quarter).
    pub buckets: usize,
    pub elapsed: Duration,
}

/// Runner wires the pipeline, aggregation and report for one batch run.
pub struct Runner {
    cfg: Config,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts the run's ingestion when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingests the input, consolidates the shards and writes the report.
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let started = Instant::now();

        let num_shards = NonZeroUsize::new(self.cfg.num_shards).unwrap_or(NonZeroUsize::MIN);
        let table = Arc::new(ShardTable::new(num_shards));
        let pipeline =
            Pipeline::with_cancellation(self.cfg.pipeline(), Arc::clone(&table), self.cancel.clone());

        info!(
            input = %self.cfg.input_path.display(),
            workers = self.cfg.worker_count,
            shards = table.num_shards(),
            interval = ?self.cfg.interval,
            utc_offset = %self.cfg.utc_offset,
            "starting rollup",
        );

        let ingest = pipeline.run_path(&self.cfg.input_path).await?;
        let consolidated = aggregate::consolidate(&pipeline)?;
        report::write_report_file(&self.cfg.output_path, &consolidated)?;

        let summary = RunSummary {
            ingest,
            entities: consolidated.entity_count(),
            buckets: consolidated.bucket_count(),
            elapsed: started.elapsed(),
        };

        info!(
            rows_read = ingest.rows_read,
            accepted = ingest.accepted,
            rejected = ingest.rejected_total(),
            malformed_row = ingest.rejected_of(RejectKind::MalformedRow),
            invalid_entity_id = ingest.rejected_of(RejectKind::InvalidEntityId),
            invalid_measurement = ingest.rejected_of(RejectKind::InvalidMeasurement),
            invalid_timestamp = ingest.rejected_of(RejectKind::InvalidTimestamp),
            entities = summary.entities,
            buckets = summary.buckets,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "rollup complete",
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_for(dir: &Path, input: &str) -> Config {
        let input_path = dir.join("input.csv");
        std::fs::write(&input_path, input).expect("write input");
        Config {
            input_path,
            output_path: dir.join("output.csv"),
            worker_count: 2,
            num_shards: 4,
            interval: Duration::ZERO,
            utc_offset: chrono::FixedOffset::east_opt(0).expect("zero offset"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_run_writes_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config_for(
            dir.path(),
            "id,kwh,ts\n2,1.5,1676419200\n1,2,1684108800\nbroken\n",
        );
        let output = cfg.output_path.clone();

        let summary = Runner::new(cfg).run().await.expect("run succeeds");
        assert_eq!(summary.ingest.rows_read, 3);
        assert_eq!(summary.ingest.accepted, 2);
        assert_eq!(summary.ingest.rejected_total(), 1);
        assert_eq!(summary.entities, 2);
        assert_eq!(summary.buckets, 2);

        let report = std::fs::read_to_string(output).expect("read report");
        assert_eq!(
            report,
            "Household ID,Quarter,Total Consumption (KWh)\n1,Q2-2023,2.00\n2,Q1-2023,1.50\n"
        );
    }

    #[tokio::test]
    async fn test_missing_input_writes_no_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config {
            input_path: dir.path().join("absent.csv"),
            output_path: dir.path().join("output.csv"),
            ..Config::default()
        };
        let output = cfg.output_path.clone();

        let err = Runner::new(cfg).run().await.expect_err("missing input");
        assert!(matches!(
            err,
            RunError::Pipeline(PipelineError::SourceUnavailable { .. })
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_unwritable_output_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config_for(dir.path(), "header\n1,1,1676419200\n");
        cfg.output_path = dir.path().join("no-such-dir").join("out.csv");

        let err = Runner::new(cfg).run().await.expect_err("unwritable output");
        assert!(matches!(
            err,
            RunError::Report(ReportError::DestinationUnwritable { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config_for(dir.path(), "header\n1,1,1676419200\n");
        let output = cfg.output_path.clone();

        let runner = Runner::new(cfg);
        runner.cancellation_token().cancel();

        let err = runner.run().await.expect_err("cancelled");
        assert!(matches!(err, RunError::Pipeline(PipelineError::Cancelled)));
        assert!(!output.exists());
    }
}
