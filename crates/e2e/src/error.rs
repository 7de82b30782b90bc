//! Error types for E2E fixtures

use std::fmt;
use thiserror::Error;

use crate::browser::EngineType;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Unknown browser engine: {0}")]
    UnknownEngine(String),

    #[error("Browser engine {engine} unavailable: {reason}")]
    EngineUnavailable { engine: EngineType, reason: String },

    #[error("Engine {0} requires a remote endpoint")]
    MissingEndpoint(EngineType),

    #[error("No active browser session")]
    NullSession,

    #[error("Driver failed to start: {0}")]
    DriverStartup(String),

    #[error("Driver health check failed after {0} attempts")]
    DriverHealthCheck(usize),

    #[error("WebDriver command {command} failed: {error}: {message}")]
    WebDriver {
        command: String,
        error: String,
        message: String,
    },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("API error {status_code}: {error_text}")]
    Api { status_code: u16, error_text: String },

    #[error("Unexpected API response: {0}")]
    ApiResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Setup failed during {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: Box<E2eError>,
    },

    #[error("Teardown failed: {}", summarize(.0))]
    Teardown(Vec<TeardownFailure>),

    #[error("Login failed: {0}")]
    Login(String),

    #[error(transparent)]
    Common(#[from] testbed_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Attach the setup stage to an error
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            E2eError::Setup { .. } => self,
            other => E2eError::Setup {
                stage,
                source: Box::new(other),
            },
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Teardown step that can fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    ReleaseSession,
    DeleteFixture { kind: &'static str, id: String },
    DatabaseTeardown,
}

impl TeardownStep {
    /// Critical steps fail the teardown; the rest are only reported
    pub fn is_critical(&self) -> bool {
        !matches!(self, TeardownStep::DeleteFixture { .. })
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::ReleaseSession => f.write_str("release session"),
            TeardownStep::DeleteFixture { kind, id } => write!(f, "delete {} {}", kind, id),
            TeardownStep::DatabaseTeardown => f.write_str("database teardown"),
        }
    }
}

/// One failed teardown step
#[derive(Debug)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub error: E2eError,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

fn summarize(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
