//! Concurrent sharded rollup of household meter readings into per-quarter
//! consumption totals.
//!
//! A [`runner::Runner`] streams a delimited input through the
//! [`ingest::Pipeline`], which fans lines out to decode workers that
//! accumulate into a [`aggregate::shard::ShardTable`]. Once ingestion has
//! drained, [`aggregate::consolidate`] merges the shards and
//! [`report::write_report_file`] emits the sorted report.

pub mod aggregate;
pub mod config;
pub mod ingest;
pub mod report;
pub mod runner;
