use thiserror::Error;

/// Fatal pipeline failures. Everything recoverable (a bad manifest, a corrupt
/// data file) is handled locally and surfaced as a [`SkipReport`] instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not determine report layout from {0} listed objects; refusing to guess")]
    UnknownLayout(usize),

    #[error("no manifest was processed successfully; nothing to write")]
    NothingProcessed,

    #[error("destination write failed: {0}")]
    Destination(String),
}

/// One skipped manifest or data file, reported at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReport {
    /// Billing period label or object key.
    pub subject: String,
    pub reason: String,
}

impl SkipReport {
    pub fn new(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
