// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("simple-camera-recorder requires the 'std' feature");

use asimov_module::SysexitsError::{self, *};
use clap::{Args, Parser, Subcommand};
use clientele::StandardOptions;
use simple_camera::{
    cli::{handle_error, info_user, warn_user, warn_user_with_error},
    shared::{
        CameraConfig, CameraError, CaptureSettings, DEFAULT_OUTPUT_DIR, DeviceSession,
        PHOTO_PREFIX, PhotoFormat, RecordingController, Resolution, SettingsUpdate,
        VideoContainer, default_encoders, default_provider, profiles_for, timestamp,
    },
};
use std::{
    error::Error as StdError,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Camera device ID
    #[arg(short = 'c', long, default_value_t = 0)]
    camera_id: u32,

    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// JSON settings file applied before any command-line overrides
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture one or more still photos
    Photo(PhotoArgs),
    /// Record a video
    Video(VideoArgs),
    /// Inspect or change persisted capture settings
    Settings(SettingsArgs),
}

#[derive(Debug, Args)]
struct PhotoArgs {
    #[arg(short, long)]
    name: Option<String>,

    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Seconds between burst shots
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    #[arg(short, long, value_name = "WxH")]
    resolution: Option<Resolution>,

    #[arg(short, long, value_name = "FORMAT")]
    format: Option<PhotoFormat>,
}

#[derive(Debug, Args)]
struct VideoArgs {
    #[arg(short, long)]
    name: Option<String>,

    /// Seconds to record; without it, records until interrupted
    #[arg(long)]
    duration: Option<f64>,

    #[arg(short, long, value_name = "WxH")]
    resolution: Option<Resolution>,

    #[arg(long)]
    fps: Option<f64>,

    #[arg(short, long, value_name = "FORMAT")]
    format: Option<VideoContainer>,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    #[arg(long)]
    show: bool,

    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    load: Option<PathBuf>,

    /// Start over from the built-in defaults
    #[arg(long)]
    reset: bool,

    #[arg(long = "set", value_name = "KEY=VALUE")]
    assignments: Vec<String>,
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(&options.flags).expect("failed to initialize logging");

    let Some(command) = &options.command else {
        eprintln!("ERROR: missing command (photo, video or settings); see --help");
        return Ok(EX_USAGE);
    };

    let result = match command {
        Command::Photo(args) => run_photo(&options, args),
        Command::Video(args) => run_video(&options, args),
        Command::Settings(args) => run_settings(&options, args),
    };

    let exit_code = match result {
        Ok(()) => EX_OK,
        Err(err) => handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn base_config(options: &Options) -> CameraConfig {
    CameraConfig::new(options.camera_id)
        .with_output_dir(&options.output_dir)
        .with_diagnostics(options.flags.debug || options.flags.verbose >= 3)
}

/// A closed session carrying the settings file (if any) merged with `overrides`.
fn prepare_session(options: &Options, overrides: &SettingsUpdate) -> Result<DeviceSession, CameraError> {
    let config = base_config(options);
    let mut session = DeviceSession::new(default_provider(&config)?, config);

    if let Some(path) = &options.settings {
        if path.exists() {
            for key in session.load_settings(path)? {
                warn_user(&options.flags, &format!("ignoring unknown setting '{key}'"));
            }
        } else {
            info_user(&options.flags, &format!("settings file {} not found, using defaults", path.display()));
        }
    }
    session.update_settings(overrides)?;
    Ok(session)
}

fn open_session(options: &Options, overrides: &SettingsUpdate) -> Result<DeviceSession, CameraError> {
    let mut session = prepare_session(options, overrides)?;
    session.open(options.camera_id)?;
    info_user(
        &options.flags,
        &format!(
            "camera {} opened at {} @ {} fps",
            options.camera_id,
            session.settings().resolution,
            session.settings().fps
        ),
    );
    Ok(session)
}

fn install_interrupt(flags: &StandardOptions) -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn_user_with_error(flags, "cannot install Ctrl-C handler", &err);
    }
    cancel
}

/// Converts a seconds flag, rejecting values no `Duration` can hold.
fn seconds(flag: &str, secs: f64) -> Result<Duration, CameraError> {
    if !(secs.is_finite() && secs >= 0.0) {
        return Err(CameraError::invalid_config(format!(
            "{flag} must be a non-negative number"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| CameraError::invalid_config(format!("{flag} is too large: {secs}")))
}

fn run_photo(options: &Options, args: &PhotoArgs) -> Result<(), CameraError> {
    if args.count == 0 {
        return Err(CameraError::invalid_config("--count must be at least 1"));
    }
    let interval = seconds("--interval", args.interval)?;

    let mut overrides = SettingsUpdate::new();
    if let Some(r) = args.resolution {
        overrides = overrides.with_resolution(r.width, r.height);
    }
    if let Some(f) = args.format {
        overrides = overrides.with_photo_format(f);
    }

    let mut session = open_session(options, &overrides)?;
    let cancel = install_interrupt(&options.flags);

    // Burst names share one timestamp so the shots sort together.
    let stem = args
        .name
        .clone()
        .unwrap_or_else(|| format!("{PHOTO_PREFIX}_{}", timestamp()));

    for shot in 1..=args.count {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let name = if args.count == 1 {
            args.name.clone()
        } else {
            Some(format!("{stem}_{shot}"))
        };
        let path = session.capture_photo(name.as_deref())?;
        println!("{}", path.display());

        if shot < args.count {
            thread::sleep(interval);
        }
    }
    Ok(())
}

fn run_video(options: &Options, args: &VideoArgs) -> Result<(), CameraError> {
    let duration = match args.duration {
        Some(secs) => seconds("--duration", secs)?,
        None => Duration::MAX,
    };

    let mut overrides = SettingsUpdate::new();
    if let Some(r) = args.resolution {
        overrides = overrides.with_resolution(r.width, r.height);
    }
    if let Some(fps) = args.fps {
        overrides = overrides.with_fps(fps);
    }
    if let Some(f) = args.format {
        overrides = overrides.with_video_format(f);
    }

    let session = open_session(options, &overrides)?;
    let container = args.format.unwrap_or(session.settings().video_format);
    let encoders = default_encoders(&base_config(options))?;
    let mut controller = RecordingController::new(session, encoders).with_profiles(profiles_for(container));

    let cancel = install_interrupt(&options.flags);
    if args.duration.is_none() {
        info_user(&options.flags, "recording until interrupted (Ctrl-C)");
    }

    let path = controller.record_for_duration(duration, args.name.as_deref(), &cancel)?;
    println!("{}", path.display());
    Ok(())
}

fn run_settings(options: &Options, args: &SettingsArgs) -> Result<(), CameraError> {
    let mut session = prepare_session(options, &SettingsUpdate::new())?;
    let mut unknown = Vec::new();

    if args.reset {
        session.update_settings(&SettingsUpdate::from_settings(&CaptureSettings::default()))?;
    }
    if let Some(path) = &args.load {
        unknown.extend(session.load_settings(path)?);
    }
    if !args.assignments.is_empty() {
        let mut update = SettingsUpdate::new();
        for assignment in &args.assignments {
            update.parse_assignment(assignment)?;
        }
        unknown.extend(session.update_settings(&update)?);
    }
    for key in unknown {
        warn_user(&options.flags, &format!("ignoring unknown setting '{key}'"));
    }

    let changed = args.reset || args.load.is_some() || !args.assignments.is_empty();
    let target = args
        .save
        .as_ref()
        .or(options.settings.as_ref().filter(|_| changed));
    match target {
        Some(path) => {
            session.save_settings(path)?;
            info_user(&options.flags, &format!("settings saved to {}", path.display()));
        },
        None if changed => {
            warn_user(&options.flags, "no --save or --settings file given; changes not persisted")
        },
        None => {},
    }

    if args.show || target.is_none() {
        let json = serde_json::to_string_pretty(session.settings())
            .map_err(|e| CameraError::other(format!("serializing settings: {e}")))?;
        println!("{json}");
    }
    Ok(())
}
