// This is free and unencumbered software released into the public domain.

//! Video encoding by piping raw `rgb24` frames into an `ffmpeg` child.

use crate::shared::{
    CameraError, EncoderFactory, EncoderProfile, Frame, Resolution, VideoCodec, VideoContainer,
    VideoSink,
};
use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread,
    time::Duration,
};

const STDERR_ENV: &str = "SIMPLE_CAMERA_FFMPEG_STDERR";

/// How long a freshly spawned encoder gets to reject its arguments.
const STARTUP_GRACE: Duration = Duration::from_millis(150);

#[derive(Clone, Debug, Default)]
pub struct FfmpegEncoderFactory {
    diagnostics: bool,
}

impl FfmpegEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    fn stderr(&self) -> Stdio {
        if self.diagnostics || env::var_os(STDERR_ENV).is_some() {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }

    /// Encodes one synthetic frame to nowhere, which fails fast when the
    /// local ffmpeg build lacks the encoder or rejects the container.
    fn probe(&self, profile: &EncoderProfile, resolution: Resolution, fps: f64) -> Result<(), CameraError> {
        let source = format!("color=c=black:s={resolution}:r={fps}");
        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-nostdin", "-loglevel", "error"])
            .args(["-f", "lavfi", "-i", &source, "-frames:v", "1"])
            .args(codec_args(profile.codec))
            .args(["-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(self.stderr())
            .status()
            .map_err(|e| CameraError::driver("running ffmpeg encoder probe", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(CameraError::other(format!("ffmpeg cannot encode {profile}")))
        }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(
        &self,
        profile: &EncoderProfile,
        path: &Path,
        resolution: Resolution,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, CameraError> {
        self.probe(profile, resolution, fps)?;

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pixel_format", "rgb24"])
            .args(["-video_size", &resolution.to_string()])
            .args(["-framerate", &fps.to_string()])
            .args(["-i", "-"])
            .args(codec_args(profile.codec))
            .args(["-f", container_format(profile.container)])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(self.stderr())
            .spawn()
            .map_err(|e| CameraError::driver("spawning ffmpeg encoder", e))?;

        thread::sleep(STARTUP_GRACE);
        if let Ok(Some(status)) = child.try_wait() {
            return Err(CameraError::other(format!(
                "ffmpeg encoder for {profile} exited at startup ({status})"
            )));
        }

        let stdin = child.stdin.take();
        Ok(Box::new(FfmpegVideoSink {
            child: Some(child),
            stdin,
            resolution,
            path: path.to_path_buf(),
            frames: 0,
        }))
    }
}

pub struct FfmpegVideoSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    resolution: Resolution,
    path: PathBuf,
    frames: u64,
}

impl VideoSink for FfmpegVideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CameraError> {
        if frame.resolution() != self.resolution {
            return Err(CameraError::capture_failed(format!(
                "frame is {}, encoder expects {}",
                frame.resolution(),
                self.resolution
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CameraError::other("encoder already finished"))?;
        stdin
            .write_all(&frame.packed())
            .map_err(|e| CameraError::write_failed("writing frame to ffmpeg", e))?;
        self.frames += 1;
        Ok(())
    }

    /// Closing stdin lets ffmpeg write the trailer; the file is complete
    /// once the child exits. ffmpeg leaves an empty file behind when it never
    /// got a frame, so that case is removed and reported as a failure.
    fn finish(&mut self) -> Result<(), CameraError> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| CameraError::write_failed("waiting for ffmpeg encoder", e))?;
        if !status.success() {
            return Err(CameraError::write_failed(
                "finalizing video",
                std::io::Error::other(format!("ffmpeg exited with {status}")),
            ));
        }
        if self.frames == 0 {
            let _ = fs::remove_file(&self.path);
            return Err(CameraError::write_failed(
                "finalizing video",
                std::io::Error::other("no frames were written"),
            ));
        }
        Ok(())
    }
}

impl Drop for FfmpegVideoSink {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

fn codec_args(codec: VideoCodec) -> Vec<&'static str> {
    match codec {
        VideoCodec::H264 => vec!["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"],
        VideoCodec::Mpeg4 => vec!["-c:v", "mpeg4", "-vtag", "mp4v", "-pix_fmt", "yuv420p"],
        VideoCodec::Xvid => vec!["-c:v", "mpeg4", "-vtag", "xvid", "-pix_fmt", "yuv420p"],
        VideoCodec::Mjpeg => vec!["-c:v", "mjpeg", "-pix_fmt", "yuvj420p"],
    }
}

fn container_format(container: VideoContainer) -> &'static str {
    match container {
        VideoContainer::Mp4 => "mp4",
        VideoContainer::Avi => "avi",
        VideoContainer::Mkv => "matroska",
    }
}
