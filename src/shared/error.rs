// This is free and unencumbered software released into the public domain.

use std::{error::Error as StdError, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("no suitable camera backend available")]
    NoDriver,

    #[error("cannot open camera device {device}: {reason}")]
    CannotOpen { device: u32, reason: String },

    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),

    #[error("camera is not open")]
    NotOpen,

    #[error("not recording")]
    NotRecording,

    #[error("already recording")]
    AlreadyRecording,

    #[error("no video encoder available (tried {})", attempted.join(", "))]
    NoEncoderAvailable { attempted: Vec<String> },

    #[error("write failed while {context}")]
    WriteFailed {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("settings file {}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("driver error while {context}")]
    DriverError {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{0}")]
    Other(String),
}

impl CameraError {
    #[inline]
    pub fn driver(context: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::DriverError {
            context,
            source: Box::new(source),
        }
    }

    #[inline]
    pub fn write_failed(
        context: &'static str,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::WriteFailed {
            context,
            source: Box::new(source),
        }
    }

    #[inline]
    pub fn settings(path: impl Into<PathBuf>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Settings {
            path: path.into(),
            source: Box::new(source),
        }
    }

    #[inline]
    pub fn cannot_open(device: u32, reason: impl Into<String>) -> Self {
        Self::CannotOpen {
            device,
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn capture_failed(msg: impl Into<String>) -> Self {
        Self::CaptureFailed(msg.into())
    }

    #[inline]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    #[inline]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// State-machine precondition violations: always a caller error.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotOpen | Self::NotRecording | Self::AlreadyRecording
        )
    }
}
