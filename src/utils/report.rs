//! Per-run record of what happened to every input file.

use crate::{qc::fastq_metadata::FastQMetadata, storage::ObjectRef};
use chrono::{DateTime, Local};
use std::fmt::Write;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub(crate) enum OutcomeStatus {
    Preprocessed {
        destination: ObjectRef,
        metadata:    FastQMetadata,
    },
    Aligned {
        destination: ObjectRef,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct FileOutcome {
    pub(crate) source:    ObjectRef,
    pub(crate) timestamp: DateTime<Local>,
    pub(crate) status:    OutcomeStatus,
}

impl FileOutcome {
    #[inline]
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

/// The ordered outcomes of one job run, rendered as a text log once the run
/// finishes.
#[derive(Debug, Default)]
pub(crate) struct RunReport {
    outcomes: Vec<FileOutcome>,
}

impl RunReport {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record(&mut self, source: ObjectRef, status: OutcomeStatus) {
        self.record_at(source, status, Local::now());
    }

    pub(crate) fn record_at(&mut self, source: ObjectRef, status: OutcomeStatus, timestamp: DateTime<Local>) {
        self.outcomes.push(FileOutcome {
            source,
            timestamp,
            status,
        });
    }

    #[inline]
    pub(crate) fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Read counts summed over every preprocessed file.
    pub(crate) fn total_metadata(&self) -> FastQMetadata {
        self.outcomes
            .iter()
            .filter_map(|o| match o.status {
                OutcomeStatus::Preprocessed { metadata, .. } => Some(metadata),
                _ => None,
            })
            .fold(FastQMetadata::new(), FastQMetadata::merge)
    }

    /// Renders the timestamped log text: three lines per preprocessed file and
    /// one line per aligned or failed file.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();

        for FileOutcome {
            source,
            timestamp,
            status,
        } in &self.outcomes
        {
            let ts = timestamp.format(TIMESTAMP_FORMAT);
            // Writing to a String cannot fail
            let _ = match status {
                OutcomeStatus::Preprocessed { destination, metadata } => write!(
                    out,
                    "{ts} - Preprocessed data saved to {destination}\n\
                     {ts} - High quality sequences: {high:.2}%\n\
                     {ts} - Low quality sequences: {low:.2}%\n",
                    high = metadata.passed_percentage(),
                    low = metadata.failed_percentage(),
                ),
                OutcomeStatus::Aligned { destination } => {
                    writeln!(out, "{ts} - Aligned {source} saved to {destination}")
                }
                OutcomeStatus::Failed { reason } => {
                    let reason = reason.replace('\n', " ");
                    writeln!(out, "{ts} - Failed to process {source}: {reason}")
                }
            };
        }

        out
    }

    /// Converts the report into the result of the whole run. Any failed file
    /// makes the run fail, listing every failure.
    pub(crate) fn into_result(self, job: &str) -> std::io::Result<()> {
        let failures = self
            .failures()
            .map(|o| o.source.to_string())
            .collect::<Vec<_>>();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "{job} failed for {failed} of {total} file(s): {list}",
                failed = failures.len(),
                total = self.outcomes.len(),
                list = failures.join(", ")
            )))
        }
    }
}
