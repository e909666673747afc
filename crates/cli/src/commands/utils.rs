use ember_core::{runtime::RuntimeError, upstream::UpstreamError};
use std::fmt;

#[derive(Debug)]
pub enum CliError {
    Config(String),
    Io(String),
    Rpc(String),
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Rpc(msg) => write!(f, "RPC error: {msg}"),
            Self::General(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::General(error.to_string())
    }
}

impl From<UpstreamError> for CliError {
    fn from(error: UpstreamError) -> Self {
        Self::Rpc(error.to_string())
    }
}

impl From<RuntimeError> for CliError {
    fn from(error: RuntimeError) -> Self {
        Self::Config(error.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}

/// Parses a JSON params argument; an absent argument means no params.
pub fn parse_params(raw: Option<&str>) -> CliResult<Option<serde_json::Value>> {
    raw.map(|text| {
        serde_json::from_str(text).map_err(|e| CliError::General(format!("Invalid params JSON: {e}")))
    })
    .transpose()
}
