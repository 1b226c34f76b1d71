// This is free and unencumbered software released into the public domain.

mod config;
pub use config::*;

mod driver;
pub use driver::*;

pub mod drivers {
    #[cfg(feature = "ffmpeg")]
    pub mod ffmpeg;

    #[cfg(feature = "ffmpeg")]
    pub mod ffmpeg_encoder;
}

mod encoder;
pub use encoder::*;

mod error;
pub use error::*;

mod frame;
pub use frame::*;

mod open;
pub use open::*;

mod output;
pub use output::*;

mod recorder;
pub use recorder::*;

mod session;
pub use session::*;

mod settings;
pub use settings::*;

mod worker;
pub use worker::*;

#[cfg(test)]
pub(crate) mod fake;
