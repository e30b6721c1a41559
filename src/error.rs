use thiserror::Error;

/// Outcomes reported by the container parsing library.
///
/// `Incomplete` is the only retryable variant: it means the library needs more
/// bytes of the source before the requested operation can succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("incomplete container, {missing} bytes missing")]
    Incomplete { missing: u64 },

    #[error("end of stream")]
    EndOfStream,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("bad parameter: {0}")]
    BadParam(String),
}

impl ContainerError {
    /// Returns true when the operation may succeed once more bytes are available.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ContainerError::Incomplete { .. })
    }
}

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),

    #[error("source incomplete, {missing} bytes missing")]
    SourceIncomplete { missing: u64 },

    #[error("reconfiguration to {url} failed: {source}")]
    ReconfigurationFailed {
        url: String,
        #[source]
        source: ContainerError,
    },

    #[error("cannot open {url}: {source}")]
    FatalOpen {
        url: String,
        #[source]
        source: ContainerError,
    },

    #[error("track ID {track_id} not found in the new container")]
    TrackResolutionMismatch { track_id: u32 },

    #[error("unsupported protection: {0}")]
    UnsupportedProtection(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, DemuxError>;
