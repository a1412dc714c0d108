//! Server configuration and command-line parsing.

use crate::connection::DEFAULT_MAX_BUFFER_SIZE;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Connections served at once; further clients wait to be accepted
    pub max_clients: usize,
    /// Largest single request the server will buffer, in bytes
    pub max_buffer_size: usize,
    /// Most verbose log level emitted
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            max_clients: crate::DEFAULT_MAX_CLIENTS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            log_level: Level::INFO,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Serve(Config),
    Help,
    Version,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

impl Config {
    /// Parses command-line arguments, excluding the program name.
    pub fn from_args<I, T>(args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = value_for(&arg, args.next())?,
                "--port" | "-p" => config.port = parse_value(&arg, args.next())?,
                "--max-clients" | "-c" => {
                    config.max_clients = parse_value(&arg, args.next())?;
                    if config.max_clients == 0 {
                        return Err(ConfigError::InvalidValue {
                            flag: arg,
                            value: "0".to_string(),
                        });
                    }
                }
                "--verbose" => config.log_level = Level::DEBUG,
                "--help" => return Ok(Invocation::Help),
                "--version" | "-v" => return Ok(Invocation::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(Invocation::Serve(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the log filter from `RUST_LOG`-style directives.
    ///
    /// Empty or unparsable directives fall back to `log_level`.
    pub fn log_filter(&self, directives: &str) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.log_level).into())
            .parse_lossy(directives)
    }
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value_for(flag, value)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

/// Usage text for `--help`.
pub const HELP: &str = r#"
pebblekv - A small in-memory key-value server

USAGE:
    pebblekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>          Port to listen on (default: 31337)
    -c, --max-clients <N>      Connections served at once (default: 64)
        --verbose              Log every command
    -v, --version              Print version information
        --help                 Print this help message

ENVIRONMENT:
    RUST_LOG                   Log filter directives; replaces the level above

COMMANDS:
    GET key | SET key value | DELETE key | FLUSH
    MGET key [key ...] | MSET key value [key value ...]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn serve(args: &[&str]) -> Config {
        match Config::from_args(args.iter().copied()) {
            Ok(Invocation::Serve(config)) => config,
            other => panic!("expected a server config, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = serve(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_address(), "127.0.0.1:31337");
        assert_eq!(config.max_clients, 64);
    }

    #[test]
    fn test_flags() {
        let config = serve(&["--host", "0.0.0.0", "-p", "6380", "-c", "8", "--verbose"]);
        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(config.max_clients, 8);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(serve(&[]).log_filter("").to_string(), "info");
        assert_eq!(serve(&["--verbose"]).log_filter("").to_string(), "debug");
        assert_eq!(serve(&["--verbose"]).log_filter("warn").to_string(), "warn");
        assert_eq!(
            serve(&[]).log_filter("pebblekv=trace").to_string(),
            "pebblekv=trace"
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(Config::from_args(["--help"]), Ok(Invocation::Help));
        assert_eq!(Config::from_args(["-v"]), Ok(Invocation::Version));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            Config::from_args(["--port"]),
            Err(ConfigError::MissingValue("--port".to_string()))
        );
        assert_eq!(
            Config::from_args(["--port", "http"]),
            Err(ConfigError::InvalidValue {
                flag: "--port".to_string(),
                value: "http".to_string(),
            })
        );
        assert!(matches!(
            Config::from_args(["--max-clients", "0"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            Config::from_args(["--daemon"]),
            Err(ConfigError::UnknownArgument("--daemon".to_string()))
        );
    }
}
