// Copyright 2025-2026 CEMAXECUTER LLC

use std::io;
use std::path::{Path, PathBuf};

use txrx_sdr::{DeviceError, RxErrorCode, UnknownSampleFormat};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Missing or inconsistent session settings, caught before streaming
    #[error("configuration error: {0}")]
    Config(String),

    /// A clock, time or LO sensor did not report lock
    #[error("{target}: {sensor} not locked ({reading})")]
    Lock {
        target: String,
        sensor: String,
        reading: String,
    },

    #[error(transparent)]
    UnknownElementType(#[from] UnknownSampleFormat),

    #[error("the tx_stream timed out sending {requested} samples ({sent} sent)")]
    SendShortfall { requested: usize, sent: usize },

    #[error("receiver error: {code}")]
    Receiver { code: RxErrorCode },

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to install interrupt handler: {0}")]
    Signal(#[source] io::Error),

    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
}

impl StreamError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        StreamError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Errors the operator can fix by changing the invocation.
    pub fn is_configuration(&self) -> bool {
        matches!(self, StreamError::Config(_) | StreamError::UnknownElementType(_))
    }
}
