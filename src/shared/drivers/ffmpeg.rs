// This is free and unencumbered software released into the public domain.

//! Capture through an `ffmpeg` child process that decodes the platform
//! camera (v4l2, avfoundation or dshow) into raw `rgb24` frames on stdout.
//!
//! The child's output is always scaled to the configured resolution and
//! resampled to the configured frame rate, so what the driver reports as its
//! current format is exactly what `read_frame` returns.

use crate::shared::{
    CameraBackend, CameraDriver, CameraError, CameraProvider, CaptureSettings, Frame, Resolution,
};
use bytes::Bytes;
use std::{
    any::Any,
    env,
    io::{BufReader, Read},
    process::{Child, ChildStdout, Command, Stdio},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

const STDERR_ENV: &str = "SIMPLE_CAMERA_FFMPEG_STDERR";

#[derive(Clone, Debug, Default)]
pub struct FfmpegProvider {
    diagnostics: bool,
}

impl FfmpegProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}

impl CameraProvider for FfmpegProvider {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Ffmpeg
    }

    fn open(&self, device: u32) -> Result<Box<dyn CameraDriver>, CameraError> {
        let input = platform::input_for(device)?;
        Ok(Box::new(FfmpegCameraDriver {
            device,
            input,
            diagnostics: self.diagnostics,
            child: None,
            stdout: None,
            primed: None,
            resolution: Resolution::new(0, 0),
            fps: 0.0,
        }))
    }

    /// A device only counts as present when it actually delivers a frame.
    fn probe(&self, device: u32) -> bool {
        let Ok(driver) = self.open(device) else {
            return false;
        };
        let mut driver = scopeguard::guard(driver, |mut d| d.release());
        let settings = CaptureSettings {
            resolution: Resolution::new(320, 240),
            ..Default::default()
        };
        driver.configure(&settings).is_ok()
    }
}

pub struct FfmpegCameraDriver {
    device: u32,
    input: String,
    diagnostics: bool,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    primed: Option<Frame>,
    resolution: Resolution,
    fps: f64,
}

impl core::fmt::Debug for FfmpegCameraDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FfmpegCameraDriver")
            .field("device", &self.device)
            .field("input", &self.input)
            .field("child", &self.child.as_ref().map(|_| "<child>"))
            .field("resolution", &self.resolution)
            .field("fps", &self.fps)
            .finish()
    }
}

impl FfmpegCameraDriver {
    #[inline]
    fn now_ns_best_effort() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    fn frame_size(&self) -> usize {
        self.resolution.width as usize * self.resolution.height as usize * 3
    }

    /// Starts the child and waits for its first frame. With `hint_input` the
    /// device itself is asked for the target size and rate; without it the
    /// device keeps its own mode and ffmpeg converts.
    fn start(&mut self, settings: &CaptureSettings, hint_input: bool) -> Result<(), CameraError> {
        self.stop_child();
        self.resolution = settings.resolution;
        self.fps = settings.fps;

        let mut child = spawn_reader(&self.input, settings, hint_input, self.diagnostics)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::other("ffmpeg stdout not piped"))?;
        self.child = Some(child);
        self.stdout = Some(BufReader::new(stdout));

        match self.read_raw() {
            Ok(frame) => {
                self.primed = Some(frame);
                Ok(())
            },
            Err(err) => {
                self.stop_child();
                Err(err)
            },
        }
    }

    fn read_raw(&mut self) -> Result<Frame, CameraError> {
        let size = self.frame_size();
        let reader = self
            .stdout
            .as_mut()
            .ok_or_else(|| CameraError::capture_failed("capture process is not running"))?;

        let mut buf = vec![0u8; size];
        match reader.read_exact(&mut buf) {
            Ok(()) => {
                let Resolution { width, height } = self.resolution;
                Ok(Frame::new_rgb8(Bytes::from(buf), width, height, width * 3)
                    .with_timestamp_ns(Self::now_ns_best_effort()))
            },
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.stop_child();
                Err(CameraError::capture_failed("ffmpeg stream ended"))
            },
            Err(e) => Err(CameraError::capture_failed(format!("ffmpeg read: {e}"))),
        }
    }

    fn stop_child(&mut self) {
        self.stdout = None;
        self.primed = None;
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            {
                unsafe {
                    let _ = libc::kill(child.id() as i32, libc::SIGTERM);
                }
                let start = std::time::Instant::now();
                while start.elapsed() < Duration::from_millis(900) {
                    if let Ok(Some(_)) = child.try_wait() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                let _ = child.kill();
                let _ = child.wait();
            }
            #[cfg(not(unix))]
            {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

impl CameraDriver for FfmpegCameraDriver {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Ffmpeg
    }

    fn configure(&mut self, settings: &CaptureSettings) -> Result<(), CameraError> {
        if let Err(err) = self.start(settings, true) {
            camera_log!(debug, device = self.device, error = %err, "device refused requested mode, letting ffmpeg convert");
            self.start(settings, false).map_err(|_| {
                CameraError::cannot_open(self.device, "ffmpeg produced no frames")
            })?;
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        match self.primed.take() {
            Some(frame) => Ok(frame),
            None => self.read_raw(),
        }
    }

    fn current_format(&self) -> (Resolution, f64) {
        if self.child.is_some() {
            (self.resolution, self.fps)
        } else {
            (Resolution::new(0, 0), 0.0)
        }
    }

    fn release(&mut self) {
        self.stop_child();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for FfmpegCameraDriver {
    fn drop(&mut self) {
        self.release();
    }
}

/// Output filter chain: scale, resample, then any image adjustments.
fn filter_chain(settings: &CaptureSettings) -> String {
    let Resolution { width, height } = settings.resolution;
    let mut chain = format!("scale={width}:{height},fps={}", settings.fps);
    let eq: Vec<String> = settings
        .adjustments()
        .map(|(name, level)| format!("{name}={level}"))
        .collect();
    if !eq.is_empty() {
        chain.push_str(",eq=");
        chain.push_str(&eq.join(":"));
    }
    chain
}

fn reader_args(input: &str, settings: &CaptureSettings, hint_input: bool) -> Vec<String> {
    let mut ffargs: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        platform::FORMAT.into(),
    ];

    if hint_input {
        ffargs.extend([
            "-video_size".into(),
            settings.resolution.to_string(),
            "-framerate".into(),
            settings.fps.to_string(),
        ]);
    }

    #[cfg(target_os = "macos")]
    {
        ffargs.push("-pixel_format".into());
        ffargs.push("0rgb".into());
    }

    ffargs.extend([
        "-i".into(),
        input.to_string(),
        "-vf".into(),
        filter_chain(settings),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-f".into(),
        "rawvideo".into(),
        "pipe:1".into(),
    ]);
    ffargs
}

fn spawn_reader(
    input: &str,
    settings: &CaptureSettings,
    hint_input: bool,
    diagnostics: bool,
) -> Result<Child, CameraError> {
    let stderr = if diagnostics || env::var_os(STDERR_ENV).is_some() {
        Stdio::inherit()
    } else {
        Stdio::null()
    };

    Command::new("ffmpeg")
        .args(reader_args(input, settings, hint_input))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .spawn()
        .map_err(|e| CameraError::driver("spawning ffmpeg", e))
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod platform {
            use crate::shared::CameraError;
            use std::path::Path;

            pub const FORMAT: &str = "v4l2";

            pub fn input_for(device: u32) -> Result<String, CameraError> {
                let node = format!("/dev/video{device}");
                if Path::new(&node).exists() {
                    Ok(node)
                } else {
                    Err(CameraError::cannot_open(device, format!("{node} does not exist")))
                }
            }
        }
    } else if #[cfg(target_os = "macos")] {
        mod platform {
            use crate::shared::CameraError;
            use std::process::Command;

            pub const FORMAT: &str = "avfoundation";

            pub fn input_for(device: u32) -> Result<String, CameraError> {
                let out = Command::new("ffmpeg")
                    .args(["-hide_banner", "-f", "avfoundation", "-list_devices", "true", "-i", ""])
                    .output()
                    .map_err(|e| CameraError::driver("running ffmpeg -list_devices", e))?;
                let stderr = String::from_utf8_lossy(&out.stderr);
                if video_indices(&stderr).contains(&device) {
                    Ok(format!("{device}:none"))
                } else {
                    Err(CameraError::cannot_open(device, "no such avfoundation video device"))
                }
            }

            /// Indices listed under "AVFoundation video devices:".
            fn video_indices(listing: &str) -> Vec<u32> {
                let mut out = Vec::new();
                let mut in_video = false;
                for line in listing.lines() {
                    if line.contains("AVFoundation video devices:") {
                        in_video = true;
                        continue;
                    }
                    if line.contains("AVFoundation audio devices:") {
                        break;
                    }
                    if !in_video {
                        continue;
                    }
                    let Some(pos) = line.find("] [") else { continue };
                    let tail = line[pos + 2..].trim();
                    let Some(end) = tail.find(']') else { continue };
                    if let Ok(idx) = tail[1..end].trim().parse() {
                        out.push(idx);
                    }
                }
                out
            }
        }
    } else if #[cfg(target_os = "windows")] {
        mod platform {
            use crate::shared::CameraError;
            use std::process::Command;

            pub const FORMAT: &str = "dshow";

            /// DirectShow has no numeric IDs; `device` indexes the listing.
            pub fn input_for(device: u32) -> Result<String, CameraError> {
                let out = Command::new("ffmpeg")
                    .args(["-hide_banner", "-f", "dshow", "-list_devices", "true", "-i", "dummy"])
                    .output()
                    .map_err(|e| CameraError::driver("running ffmpeg -list_devices", e))?;
                let stderr = String::from_utf8_lossy(&out.stderr);
                video_names(&stderr)
                    .into_iter()
                    .nth(device as usize)
                    .map(|name| format!("video={name}"))
                    .ok_or_else(|| CameraError::cannot_open(device, "no such dshow video device"))
            }

            fn video_names(listing: &str) -> Vec<String> {
                let mut out = Vec::new();
                let mut in_video = false;
                for line in listing.lines() {
                    if line.contains("DirectShow video devices") {
                        in_video = true;
                        continue;
                    }
                    if in_video && line.contains("DirectShow audio devices") {
                        break;
                    }
                    if !in_video {
                        continue;
                    }
                    let Some(start) = line.find('"') else { continue };
                    let rest = &line[start + 1..];
                    let Some(end) = rest.find('"') else { continue };
                    if end > 0 {
                        out.push(rest[..end].to_string());
                    }
                }
                out
            }
        }
    } else {
        mod platform {
            use crate::shared::CameraError;

            pub const FORMAT: &str = "";

            pub fn input_for(_device: u32) -> Result<String, CameraError> {
                Err(CameraError::NoDriver)
            }
        }
    }
}
