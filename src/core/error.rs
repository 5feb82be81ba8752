// src/core/error.rs

use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the persistence seam.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("unique constraint violated on {entity}: {key}")]
    UniqueViolation { entity: &'static str, key: String },
}

/// Failures raised while driving a headless browser session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("devtools protocol error: {0}")]
    Protocol(String),
}

/// Main error type of the scan engine.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid scan request: {0}")]
    Validation(String),

    #[error("could not resolve host {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("task execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("scan pipeline aborted: {0}")]
    Pipeline(String),
}

pub type ScanResult<T> = Result<T, ScanError>;
