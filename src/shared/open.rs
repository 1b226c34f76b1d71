// This is free and unencumbered software released into the public domain.

use super::{CameraConfig, CameraError, CameraProvider, EncoderFactory};

/// The capture backend compiled into this build.
pub fn default_provider(config: &CameraConfig) -> Result<Box<dyn CameraProvider>, CameraError> {
    if cfg!(feature = "ffmpeg") {
        #[cfg(feature = "ffmpeg")]
        return Ok(Box::new(
            super::drivers::ffmpeg::FfmpegProvider::new().with_diagnostics(config.diagnostics),
        ));
    }
    let _ = config;
    Err(CameraError::NoDriver)
}

/// The video encoder compiled into this build.
pub fn default_encoders(config: &CameraConfig) -> Result<Box<dyn EncoderFactory>, CameraError> {
    if cfg!(feature = "ffmpeg") {
        #[cfg(feature = "ffmpeg")]
        return Ok(Box::new(
            super::drivers::ffmpeg_encoder::FfmpegEncoderFactory::new()
                .with_diagnostics(config.diagnostics),
        ));
    }
    let _ = config;
    Err(CameraError::NoDriver)
}
