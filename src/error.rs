//! The error type shared by the session controller, the file writer and the
//! recorder loop.

use std::{borrow::Cow, fmt, io, path::PathBuf};

use crate::gui::HudError;
use crate::simulator::SimError;

/// Everything that can go wrong while configuring, recording or flushing a
/// driving session.
#[derive(Debug)]
pub enum RecorderError {
    /// Returned when reading or writing files fails.
    Io(io::Error),

    /// Returned when the output directory exists but cannot be written to.
    NotWritable(PathBuf),

    /// Returned when the action log cannot be serialized.
    Json(serde_json::Error),

    /// Returned when the placeholder audio track cannot be written.
    Wav(hound::Error),

    /// Returned when a configuration file cannot be parsed.
    Ron(ron::de::SpannedError),

    /// Returned when the video encoder fails or rejects a frame.
    Video(String),

    /// Returned when the configuration is unusable.
    Config(String),

    /// Returned when the simulator collaborator fails in a way that cannot
    /// be recovered locally.
    Simulator(SimError),

    /// Returned when the terminal cannot be driven.
    Terminal(HudError),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RecorderError as RE;
        let msg = match self {
            RE::Io(error) => Cow::from(format!("io error: {}", error)),
            RE::NotWritable(path) => {
                Cow::from(format!("output directory {} is not writable", path.display()))
            }
            RE::Json(error) => Cow::from(format!("json error: {}", error)),
            RE::Wav(error) => Cow::from(format!("wav error: {}", error)),
            RE::Ron(error) => Cow::from(format!("config parse error: {}", error)),
            RE::Video(msg) => Cow::from(format!("video error: {}", msg)),
            RE::Config(msg) => Cow::from(format!("invalid configuration: {}", msg)),
            RE::Simulator(error) => Cow::from(format!("simulator error: {}", error)),
            RE::Terminal(error) => Cow::from(format!("terminal error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RecorderError {}

impl From<io::Error> for RecorderError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<hound::Error> for RecorderError {
    fn from(value: hound::Error) -> Self {
        Self::Wav(value)
    }
}

impl From<ron::de::SpannedError> for RecorderError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::Ron(value)
    }
}

impl From<tempfile::PersistError> for RecorderError {
    fn from(value: tempfile::PersistError) -> Self {
        Self::Io(value.error)
    }
}

impl From<SimError> for RecorderError {
    fn from(value: SimError) -> Self {
        Self::Simulator(value)
    }
}

impl From<HudError> for RecorderError {
    fn from(value: HudError) -> Self {
        Self::Terminal(value)
    }
}
