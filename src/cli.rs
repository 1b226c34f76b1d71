// This is free and unencumbered software released into the public domain.

//! CLI helpers (error reporting, verbosity handling).
//!
//! This module must compile even when the crate feature `cli` is disabled,
//! because the library is built in non-CLI configurations.

#[cfg(feature = "cli")]
use crate::shared::CameraError;

#[cfg(feature = "cli")]
use asimov_module::SysexitsError::{self, *};

#[cfg(feature = "cli")]
use clientele::StandardOptions;

#[cfg(feature = "cli")]
pub fn handle_error(err: &CameraError, flags: &StandardOptions) -> SysexitsError {
    #[cfg(feature = "tracing")]
    {
        use asimov_module::tracing::{debug, error};

        error!(target: "simple_camera", %err, "camera command failed");

        if flags.debug || flags.verbose >= 2 {
            debug!(target: "simple_camera", ?err, "detailed error");
        }
    }

    report_error(err, flags);
    map_error_to_sysexit(err)
}

#[cfg(feature = "cli")]
pub fn info_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("INFO: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::info!(target: "simple_camera", "{msg}");
}

#[cfg(feature = "cli")]
pub fn warn_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("WARN: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::warn!(target: "simple_camera", "{msg}");
}

#[cfg(feature = "cli")]
pub fn warn_user_with_error(flags: &StandardOptions, msg: &str, error: &dyn std::error::Error) {
    if flags.debug || flags.verbose >= 2 {
        eprintln!("WARN: {msg}: {error}");
    } else if flags.verbose >= 1 {
        eprintln!("WARN: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::warn!(target: "simple_camera", error = %error, "{msg}");
}

#[cfg(feature = "cli")]
fn report_error(err: &CameraError, flags: &StandardOptions) {
    use std::error::Error as _;
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "ERROR: {err}");

    if flags.debug || flags.verbose >= 2 {
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(stderr, "  Caused by: {}", cause);
            source = cause.source();
        }
    }
}

#[cfg(feature = "cli")]
fn map_error_to_sysexit(err: &CameraError) -> SysexitsError {
    match err {
        CameraError::NoDriver => EX_UNAVAILABLE,
        CameraError::CannotOpen { .. } => EX_UNAVAILABLE,
        CameraError::NoEncoderAvailable { .. } => EX_UNAVAILABLE,
        e if e.is_precondition() => EX_USAGE,
        CameraError::InvalidConfig(_) => EX_DATAERR,
        CameraError::Settings { .. } => EX_CONFIG,
        CameraError::WriteFailed { .. } => EX_IOERR,
        CameraError::CaptureFailed(_) => EX_IOERR,
        _ => EX_SOFTWARE,
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_distinct_exit_codes() {
        let io = || std::io::Error::other("disk full");
        assert!(matches!(map_error_to_sysexit(&CameraError::NotRecording), EX_USAGE));
        assert!(matches!(map_error_to_sysexit(&CameraError::AlreadyRecording), EX_USAGE));
        assert!(matches!(
            map_error_to_sysexit(&CameraError::cannot_open(1, "busy")),
            EX_UNAVAILABLE
        ));
        assert!(matches!(
            map_error_to_sysexit(&CameraError::NoEncoderAvailable { attempted: vec![] }),
            EX_UNAVAILABLE
        ));
        assert!(matches!(
            map_error_to_sysexit(&CameraError::write_failed("saving photo", io())),
            EX_IOERR
        ));
        assert!(matches!(
            map_error_to_sysexit(&CameraError::settings("cfg.json", io())),
            EX_CONFIG
        ));
        assert!(matches!(
            map_error_to_sysexit(&CameraError::invalid_config("fps")),
            EX_DATAERR
        ));
        assert!(matches!(map_error_to_sysexit(&CameraError::other("?")), EX_SOFTWARE));
    }
}
