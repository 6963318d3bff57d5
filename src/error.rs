//! # Error Types Module
//!
//! Centralized error handling for the VitalStream pipeline.
//! Provides custom error types for each module with proper context and error chaining.
//!
//! ## Error Types
//! - `LinkError`: radio link lifecycle and runtime failures
//! - `TransportError`: failures reported by a transport implementation
//! - `ConfigError`: configuration file I/O and parsing errors
//! - `StoreError`: persistent-store flush failures
//! - `ParseError`: record parse failures (never escapes the parser; logged and dropped)
//!
//! ## Why Custom Errors
//! - Type-safe error handling with match expressions
//! - Easier debugging with context preservation
//! - Enables proper error recovery strategies (reconnect, drop-and-continue)

use std::fmt;

/// Errors that can occur while managing the radio link
#[derive(Debug)]
pub enum LinkError {
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// Errors reported by a transport implementation.
///
/// The link manager treats every variant as a disconnect and retries;
/// none of these are fatal to the pipeline.
#[derive(Debug)]
pub enum TransportError {
    /// No radio adapter found or the platform stack is unavailable
    NoAdapter,
    /// Connection attempt failed
    ConnectFailed(String),
    /// Read failed or the peer dropped the connection mid-stream
    ReadFailed(String),
    /// Operation requires an open connection
    NotConnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NoAdapter => {
                write!(f, "No radio adapter found. Please ensure the radio is enabled.")
            }
            TransportError::ConnectFailed(msg) => {
                write!(f, "Failed to open connection: {}", msg)
            }
            TransportError::ReadFailed(msg) => {
                write!(f, "Read from transport failed: {}", msg)
            }
            TransportError::NotConnected => {
                write!(f, "Transport is not connected")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

/// Errors reported by the persistent-store collaborator.
///
/// The batch uploader logs these and moves on; the batch is cleared
/// either way (at-most-once delivery).
#[derive(Debug)]
pub enum StoreError {
    /// Underlying file or connection I/O failed
    Io(std::io::Error),
    /// A document could not be serialized for the store
    Serialize(String),
    /// The store rejected the batch
    #[allow(dead_code)]
    Rejected(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O failed: {}", e),
            StoreError::Serialize(msg) => write!(f, "Failed to serialize document: {}", msg),
            StoreError::Rejected(msg) => write!(f, "Store rejected batch: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Record parse failures.
///
/// These never propagate past the parser boundary: a failed record is
/// dropped with the reason logged, and the pipeline continues.
#[derive(Debug)]
pub enum ParseError {
    /// Body was not valid JSON, even after lenient recovery
    Syntax(String),
    /// Payload parsed but had an unexpected shape
    Shape(String),
    /// A CSV line had the wrong number of columns
    ColumnCount { expected: usize, got: usize },
    /// A CSV column did not parse as a number
    BadNumber { column: String, value: String },
    /// No recognized channel survived parsing
    Empty,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Syntax(msg) => write!(f, "Invalid record syntax: {}", msg),
            ParseError::Shape(msg) => write!(f, "Unexpected record shape: {}", msg),
            ParseError::ColumnCount { expected, got } => {
                write!(f, "Expected {} columns, got {}", expected, got)
            }
            ParseError::BadNumber { column, value } => {
                write!(f, "Column {} is not numeric: {:?}", column, value)
            }
            ParseError::Empty => write!(f, "Record contained no recognized channels"),
        }
    }
}

impl std::error::Error for ParseError {}
