use std::path::PathBuf;
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building, running or calling a local stack.
#[derive(Debug, Error)]
pub enum Error {
    // Setup errors
    #[error("Artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Failed to extract {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to serialize the template: {0}")]
    Template(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Launch errors
    #[error("Failed to launch the emulator `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The emulator exited before it started listening ({0:?})")]
    EmulatorExited(Option<i32>),

    #[error("The emulator did not accept connections on {0} in time")]
    NotReady(String),

    // Invocation errors
    #[error("Transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("Failed to read the response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("Invoke of {function} failed with HTTP {status}: {body}")]
    InvokeStatus { function: String, status: u16, body: String },

    #[error("Function {function} returned an error ({kind}): {payload}")]
    FunctionError {
        function: String,
        kind: String,
        payload: String,
    },

    #[error("Failed to serialize the invoke payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("Malformed response envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Lifecycle errors
    #[error("Cannot {operation} a session that is {state}")]
    InvalidState { operation: &'static str, state: &'static str },

    #[error("Failed to tear down the session: {0}")]
    Teardown(#[source] std::io::Error),
}
