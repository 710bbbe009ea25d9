use std::path::{Path, PathBuf};

/// Errors reported while loading models or feeding a session.
///
/// Mid-stream decode anomalies (an empty beam, a non-finite best cost) are
/// not errors; the per-frame decoder step reports them as `false` and the
/// session keeps accepting samples.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupted file {}: {message}", path.display())]
    Corruption { path: PathBuf, message: String },
    #[error("{0}")]
    Runtime(String),
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Error::Corruption {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
