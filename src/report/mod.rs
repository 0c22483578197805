//! Quarterly report serialization.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::aggregate::Consolidated;

/// Report column headers.
pub const REPORT_HEADER: [&str; 3] = ["Household ID", "Quarter", "Total Consumption (KWh)"];

/// Errors from writing the report.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("destination {} unwritable", .path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes the header and one row per (entity, quarter), sorted by entity
/// then quarter label, totals with two decimals.
pub fn write_report<W: Write>(mut out: W, result: &Consolidated) -> io::Result<()> {
    writeln!(out, "{}", REPORT_HEADER.join(","))?;
    for row in result.rows() {
        writeln!(out, "{},{},{:.2}", row.entity, row.quarter, row.total)?;
    }
    out.flush()
}

/// Creates (or truncates) `path` and writes the report to it.
pub fn write_report_file(path: &Path, result: &Consolidated) -> Result<(), ReportError> {
    let unwritable = |source| ReportError::DestinationUnwritable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(unwritable)?;
    write_report(BufWriter::new(file), result).map_err(unwritable)?;

    info!(
        path = %path.display(),
        rows = result.bucket_count(),
        "report written"
    );
    Ok(())
}
