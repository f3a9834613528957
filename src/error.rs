use std::io;
use thiserror::Error;
use warp::http::StatusCode;

pub use crate::driver::CommandError;
pub use crate::plugin::schema::PluginError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown command: no route matches {method} {path}")]
    UnknownRoute { method: String, path: String },

    #[error("Method {method} is not supported for {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// HTTP status a request failing with this error is answered with
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute { .. } => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::InvalidRequest(_) | ServerError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Command(e) => match e {
                CommandError::UnknownCommand(_) => StatusCode::NOT_FOUND,
                CommandError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                CommandError::Blocked { .. } => StatusCode::FORBIDDEN,
                CommandError::Proxy(_) => StatusCode::BAD_GATEWAY,
                CommandError::Failed(_) | CommandError::Plugin(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error name for response bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::UnknownRoute { .. } => "unknown command",
            ServerError::MethodNotAllowed { .. } => "unknown method",
            ServerError::InvalidRequest(_) | ServerError::Serialization(_) => "invalid argument",
            ServerError::Command(e) => match e {
                CommandError::UnknownCommand(_) => "unknown command",
                CommandError::InvalidArgument(_) => "invalid argument",
                CommandError::Blocked { .. } => "command blocked",
                CommandError::Proxy(_) => "proxy error",
                CommandError::Plugin(_) => "plugin error",
                CommandError::Failed(_) => "unknown error",
            },
            ServerError::Plugin(_) => "plugin error",
            _ => "unknown error",
        }
    }
}

impl warp::reject::Reject for ServerError {}
