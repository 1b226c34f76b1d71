// This is free and unencumbered software released into the public domain.

//! Photo capture and duration-bounded video recording from one camera.
//!
//! A [`shared::DeviceSession`] owns the device; a
//! [`shared::RecordingController`] built on top of it runs the
//! idle/recording state machine, encoder fallback and frame pacing.

/// Structured log line under the crate's target; compiles away without the
/// `tracing` feature.
macro_rules! camera_log {
    ($level:ident, $($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        asimov_module::tracing::$level!(target: "simple_camera", $($arg)+);
    };
}

pub mod cli;
pub mod shared;
