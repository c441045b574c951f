//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{BuildArgs, BuildOverrides, CliArgs, Command, LogOverrides, ServeArgs, ServeOverrides};

const LOCAL_CONFIG_BASENAME: &str = "prerender";
const ENV_PREFIX: &str = "PRERENDER";
const DEFAULT_OUTPUT_DIR: &str = "build";
const DEFAULT_INDEX_FILENAME: &str = "index.html";
const DEFAULT_CONCURRENCY: usize = 50;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4567;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 5;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub build: BuildOptions,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Parameters of a build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Root directory receiving generated files.
    pub output_dir: PathBuf,
    /// Number of workers building paths at once.
    pub concurrency: NonZeroUsize,
    /// File name used for directory-style paths such as `/docs/`.
    pub index_filename: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            concurrency: NonZeroUsize::new(DEFAULT_CONCURRENCY).unwrap_or(NonZeroUsize::MIN),
            index_filename: DEFAULT_INDEX_FILENAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build: BuildOptions::default(),
            server: ServerSettings {
                addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
                graceful_shutdown: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_command_overrides(cli.command.as_ref());

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    build: RawBuildSettings,
    server: RawServerSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: Option<&Command>) {
        match command {
            Some(Command::Build(args)) => self.apply_build_overrides(&args.overrides),
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            None => self.apply_serve_overrides(&ServeOverrides::default()),
        }
    }

    fn apply_build_overrides(&mut self, overrides: &BuildOverrides) {
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.build.output_dir = Some(dir.clone());
        }
        if let Some(concurrency) = overrides.concurrency {
            self.build.concurrency = Some(concurrency);
        }
        if let Some(name) = overrides.index_filename.as_ref() {
            self.build.index_filename = Some(name.clone());
        }
        self.apply_log_overrides(&overrides.log);
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.build.output_dir = Some(dir.clone());
        }
        self.apply_log_overrides(&overrides.log);
    }

    fn apply_log_overrides(&mut self, overrides: &LogOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            build,
            server,
            logging,
        } = raw;

        Ok(Self {
            build: build_build_options(build)?,
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_build_options(build: RawBuildSettings) -> Result<BuildOptions, LoadError> {
    let output_dir = build
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "build.output_dir",
            "path must not be empty",
        ));
    }

    let concurrency = build.concurrency.unwrap_or(DEFAULT_CONCURRENCY as u64);
    let concurrency = non_zero_usize(concurrency, "build.concurrency")?;

    let index_filename = build
        .index_filename
        .unwrap_or_else(|| DEFAULT_INDEX_FILENAME.to_string());
    if index_filename.is_empty() {
        return Err(LoadError::invalid(
            "build.index_filename",
            "file name must not be empty",
        ));
    }
    if index_filename.contains(['/', '\\']) || index_filename == "." || index_filename == ".." {
        return Err(LoadError::invalid(
            "build.index_filename",
            format!("`{index_filename}` must be a plain file name"),
        ));
    }

    Ok(BuildOptions {
        output_dir,
        concurrency,
        index_filename,
    })
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuildSettings {
    output_dir: Option<PathBuf>,
    concurrency: Option<u64>,
    index_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
