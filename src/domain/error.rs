use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Error type handlers report failures with, matching tower's convention.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stage of a single-path build that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    CreateDir,
    CreateFile,
    Request,
    Handler,
}

impl BuildStage {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStage::CreateDir => "create-dir",
            BuildStage::CreateFile => "create-file",
            BuildStage::Request => "request",
            BuildStage::Handler => "handler",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure building one path. The message carries the cause so a single line is enough
/// to diagnose it in logs.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unable to create dir {} for path {path}: {source}", .dir.display())]
    CreateDir {
        path: String,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to create file {} for path {path}: {source}", .file.display())]
    CreateFile {
        path: String,
        file: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to create request for path {path}: {source}")]
    Request {
        path: String,
        #[source]
        source: axum::http::Error,
    },
    #[error("handler failed for path {path}: {source}")]
    Handler {
        path: String,
        #[source]
        source: BoxError,
    },
}

impl BuildError {
    pub fn stage(&self) -> BuildStage {
        match self {
            BuildError::CreateDir { .. } => BuildStage::CreateDir,
            BuildError::CreateFile { .. } => BuildStage::CreateFile,
            BuildError::Request { .. } => BuildStage::Request,
            BuildError::Handler { .. } => BuildStage::Handler,
        }
    }

    /// Logical path the failing build was for.
    pub fn path(&self) -> &str {
        match self {
            BuildError::CreateDir { path, .. }
            | BuildError::CreateFile { path, .. }
            | BuildError::Request { path, .. }
            | BuildError::Handler { path, .. } => path,
        }
    }

    /// Underlying I/O error, when the failure came from the filesystem.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            BuildError::CreateDir { source, .. } | BuildError::CreateFile { source, .. } => {
                Some(source)
            }
            BuildError::Handler { source, .. } => source.downcast_ref::<io::Error>(),
            BuildError::Request { .. } => None,
        }
    }
}
