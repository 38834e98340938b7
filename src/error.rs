use crate::models::SessionKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No active UI surface to attach to")]
    NoActiveSurface,

    #[error("A {0} session is already outstanding")]
    SessionOutstanding(SessionKind),

    #[error("Unknown session kind: {0}")]
    UnknownKind(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Bridge must be created inside a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Finalize(#[from] FinalizeError),

    #[error("Host error: {0}")]
    Host(#[from] anyhow::Error),
}

/// I/O failure while copying external content into the cache.
/// The partially written destination has already been removed.
#[derive(Error, Debug)]
#[error("Staging failed: {cause}")]
pub struct StagingError {
    pub destination: Option<PathBuf>,
    #[source]
    pub cause: io::Error,
}

impl StagingError {
    pub(crate) fn new(destination: Option<PathBuf>, cause: io::Error) -> Self {
        Self { destination, cause }
    }
}

/// I/O failure while publishing a download. The source file is untouched.
#[derive(Error, Debug)]
#[error("Download finalization failed for {}: {cause}", .source_path.display())]
pub struct FinalizeError {
    pub source_path: PathBuf,
    pub destination: Option<PathBuf>,
    #[source]
    pub cause: io::Error,
}

impl FinalizeError {
    pub(crate) fn new(
        source_path: PathBuf,
        destination: Option<PathBuf>,
        cause: io::Error,
    ) -> Self {
        Self {
            source_path,
            destination,
            cause,
        }
    }
}
