//! Per-path outcome records.

use std::{fmt, path::PathBuf};

use super::error::BuildError;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// The path was written to the output directory.
    Build,
    /// The path was answered by the live server.
    Serve,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Build => "build",
            Action::Serve => "serve",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per processed path.
///
/// `status_code` is `0` when the handler was never reached or did not complete.
#[derive(Debug)]
pub struct Event {
    pub action: Action,
    pub path: String,
    pub output_path: Option<PathBuf>,
    pub status_code: u16,
    pub error: Option<BuildError>,
}

impl Event {
    pub fn build(
        path: impl Into<String>,
        output_path: PathBuf,
        status_code: u16,
        error: Option<BuildError>,
    ) -> Self {
        Self {
            action: Action::Build,
            path: path.into(),
            output_path: Some(output_path),
            status_code,
            error,
        }
    }

    pub fn serve(
        path: impl Into<String>,
        output_path: Option<PathBuf>,
        status_code: u16,
        error: Option<BuildError>,
    ) -> Self {
        Self {
            action: Action::Serve,
            path: path.into(),
            output_path,
            status_code,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Action: {}, Path: {}, StatusCode: {}",
            self.action, self.path, self.status_code
        )?;
        if let Some(output_path) = &self.output_path {
            write!(f, ", OutputPath: {}", output_path.display())?;
        }
        if let Some(error) = &self.error {
            write!(f, ", Error: {error}")?;
        }
        Ok(())
    }
}
