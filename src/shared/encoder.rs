// This is free and unencumbered software released into the public domain.

//! Video encoder seam and the ordered codec fallback policy.

use crate::shared::{
    CameraError, CameraEvent, EventSink, Frame, Resolution, VideoCodec, VideoContainer,
};
use derive_more::Display;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("{container}/{codec}")]
pub struct EncoderProfile {
    pub container: VideoContainer,
    pub codec: VideoCodec,
}

impl EncoderProfile {
    pub const fn new(container: VideoContainer, codec: VideoCodec) -> Self {
        Self { container, codec }
    }

    /// `path` with its extension replaced when it does not already name this
    /// profile's container.
    pub fn output_path(&self, path: &Path) -> PathBuf {
        let ext = self.container.extension();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if matches {
            path.to_path_buf()
        } else {
            path.with_extension(ext)
        }
    }
}

/// Tried in order: H.264 in MP4, MPEG-4 Part 2 in MP4, then Motion JPEG in
/// AVI (MJPEG cannot go into MP4, so that attempt rewrites the extension).
pub const FALLBACK_PROFILES: [EncoderProfile; 3] = [
    EncoderProfile::new(VideoContainer::Mp4, VideoCodec::H264),
    EncoderProfile::new(VideoContainer::Mp4, VideoCodec::Mpeg4),
    EncoderProfile::new(VideoContainer::Avi, VideoCodec::Mjpeg),
];

/// The container every recording is first requested in.
pub const PRIMARY_CONTAINER: VideoContainer = VideoContainer::Mp4;

/// The fallback order with `container` preferred for the first two codecs.
/// The Motion JPEG last resort always stays in AVI.
pub fn profiles_for(container: VideoContainer) -> Vec<EncoderProfile> {
    let mut profiles = FALLBACK_PROFILES.to_vec();
    for profile in profiles.iter_mut().filter(|p| p.codec != VideoCodec::Mjpeg) {
        profile.container = container;
    }
    profiles
}

/// An open encoder writing one output file.
///
/// `finish` flushes and closes the file; calling it again does nothing.
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CameraError>;
    fn finish(&mut self) -> Result<(), CameraError>;
}

pub trait EncoderFactory: Send {
    fn create(
        &self,
        profile: &EncoderProfile,
        path: &Path,
        resolution: Resolution,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, CameraError>;
}

pub struct Negotiated {
    pub profile: EncoderProfile,
    /// 0-based position of `profile` in the list that was tried.
    pub attempt: usize,
    pub path: PathBuf,
    pub sink: Box<dyn VideoSink>,
}

impl core::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Negotiated")
            .field("profile", &self.profile)
            .field("attempt", &self.attempt)
            .field("path", &self.path)
            .finish()
    }
}

/// Tries `profiles` in order and returns the first encoder that initializes.
/// A failed attempt leaves no file behind unless the file existed before.
pub fn negotiate(
    factory: &dyn EncoderFactory,
    profiles: &[EncoderProfile],
    path: &Path,
    resolution: Resolution,
    fps: f64,
    events: &EventSink,
) -> Result<Negotiated, CameraError> {
    let mut attempted = Vec::with_capacity(profiles.len());

    for (attempt, profile) in profiles.iter().enumerate() {
        let candidate = profile.output_path(path);
        let existed = candidate.exists();

        match factory.create(profile, &candidate, resolution, fps) {
            Ok(sink) => {
                camera_log!(info, %profile, attempt, path = %candidate.display(), "video encoder selected");
                events.emit(CameraEvent::EncoderSelected {
                    profile: *profile,
                    attempt,
                    path: candidate.clone(),
                });
                return Ok(Negotiated {
                    profile: *profile,
                    attempt,
                    path: candidate,
                    sink,
                });
            },
            Err(err) => {
                camera_log!(warn, %profile, error = %err, "video encoder unavailable, trying next");
                if !existed && candidate.exists() {
                    let _ = fs::remove_file(&candidate);
                }
                events.emit(CameraEvent::EncoderRejected {
                    profile: *profile,
                    reason: err.to_string(),
                });
                attempted.push(profile.to_string());
            },
        }
    }

    Err(CameraError::NoEncoderAvailable { attempted })
}
