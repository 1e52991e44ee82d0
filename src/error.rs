//! Library error type.
//!
//! Producer-side faults never surface here: the ring store absorbs them.
//! These variants reach the immediate caller of a consumer-side operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Degenerate or unavailable export window, rejected before a job starts.
    #[error("invalid export window: {0}")]
    InvalidWindow(String),

    /// Neither the primary container nor the fallback could be opened.
    #[error("clip output could not be opened: {0}")]
    SinkOpen(String),

    /// The sink opened but failed while writing or finalizing.
    #[error("clip output failed: {0}")]
    Sink(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("capture error: {0}")]
    Capture(String),

    /// Control input that does not parse.
    #[error("unknown command: {0}")]
    Command(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
