use thiserror::Error;

/// Failure kinds of the ingest pipeline.
///
/// Per-file kinds (`SourceMissing`, `SourceRejected`, `SourceUnreadable`,
/// `SourceUnstable`, `HashFailure`, `MoveFailure`) are recorded against a single file and never
/// abort its siblings. The remaining kinds stop the whole batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source file not found or not a regular file: {0}")]
    SourceMissing(String),
    #[error("refusing to ingest a file already inside projects_base: {0}")]
    SourceRejected(String),
    #[error("could not stat source {path}: {reason}")]
    SourceUnreadable { path: String, reason: String },
    #[error("source did not stabilize after {attempts} polls: {path}")]
    SourceUnstable { path: String, attempts: u32 },
    #[error("could not checksum {path}: {reason}")]
    HashFailure { path: String, reason: String },
    #[error("failed to move {from} to {to}: {reason}")]
    MoveFailure {
        from: String,
        to: String,
        reason: String,
    },
    #[error("timed out after {waited_ms}ms acquiring ledger lock {path}")]
    LedgerLockTimeout { path: String, waited_ms: u64 },
    #[error("no routing rule matched: {0}")]
    NoRouteMatched(String),
    #[error("config invalid: {0}")]
    ConfigInvalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorCode {
    E001SourceUnstable,
    E002HashFailure,
    E003MoveFailure,
    E004LedgerLockTimeout,
    E005NoRouteMatched,
    E006ConfigInvalid,
    E007SourceMissing,
    E008SourceRejected,
    E009SourceUnreadable,
}

impl PipelineErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001SourceUnstable => "E001_SOURCE_UNSTABLE",
            Self::E002HashFailure => "E002_HASH_FAILURE",
            Self::E003MoveFailure => "E003_MOVE_FAILURE",
            Self::E004LedgerLockTimeout => "E004_LEDGER_LOCK_TIMEOUT",
            Self::E005NoRouteMatched => "E005_NO_ROUTE_MATCHED",
            Self::E006ConfigInvalid => "E006_CONFIG_INVALID",
            Self::E007SourceMissing => "E007_SOURCE_MISSING",
            Self::E008SourceRejected => "E008_SOURCE_REJECTED",
            Self::E009SourceUnreadable => "E009_SOURCE_UNREADABLE",
        }
    }
}

impl PipelineError {
    pub fn code(&self) -> PipelineErrorCode {
        match self {
            Self::SourceUnstable { .. } => PipelineErrorCode::E001SourceUnstable,
            Self::HashFailure { .. } => PipelineErrorCode::E002HashFailure,
            Self::MoveFailure { .. } => PipelineErrorCode::E003MoveFailure,
            Self::LedgerLockTimeout { .. } => PipelineErrorCode::E004LedgerLockTimeout,
            Self::NoRouteMatched(_) => PipelineErrorCode::E005NoRouteMatched,
            Self::ConfigInvalid(_) => PipelineErrorCode::E006ConfigInvalid,
            Self::SourceMissing(_) => PipelineErrorCode::E007SourceMissing,
            Self::SourceRejected(_) => PipelineErrorCode::E008SourceRejected,
            Self::SourceUnreadable { .. } => PipelineErrorCode::E009SourceUnreadable,
        }
    }

    /// Whether this failure must stop the remaining files of a batch.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::LedgerLockTimeout { .. } | Self::NoRouteMatched(_) | Self::ConfigInvalid(_)
        )
    }
}
