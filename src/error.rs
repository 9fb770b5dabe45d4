//! Error handling for rxchain
//!
//! This module defines the crate-level error type and a Result alias for use
//! throughout the library. Pipeline mutation has its own error type in
//! [`crate::pipeline::PipelineError`], which converts into [`RxError`].

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for rxchain operations
#[derive(Error, Debug)]
pub enum RxError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to spawning or signalling child processes
    #[error("Process error: {0}")]
    Process(String),

    /// Errors raised by pipeline construction or mutation
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to device sessions
    #[error("Device '{device}': {message}")]
    Device { device: String, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RxError>,
    },
}

impl RxError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RxError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        RxError::Device {
            device: device.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for RxError {
    fn from(err: toml::de::Error) -> Self {
        RxError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for RxError {
    fn from(err: toml::ser::Error) -> Self {
        RxError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RxError {
    fn from(err: serde_json::Error) -> Self {
        RxError::Serialization(err.to_string())
    }
}

impl From<nix::Error> for RxError {
    fn from(err: nix::Error) -> Self {
        RxError::Process(err.to_string())
    }
}

/// Result type alias for rxchain operations
pub type Result<T> = std::result::Result<T, RxError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RxError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RxError::Io(e).with_context(f()))
    }
}
