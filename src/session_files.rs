//! Naming of the files a session produces, and recovery of the session
//! counter from whatever a previous run left in the output folder.
//!
//! Session `N` writes `recording_drive-N.mp4`, `actions_drive-N.json` and
//! `audio_drive-N.wav` (prefixes are configurable).

use nom::{
    bytes::complete::tag,
    character::complete::{char, u32},
    combinator::eof,
    sequence::{preceded, terminated, tuple},
    Finish, IResult,
};

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::config::RecorderConfig;
use crate::error::RecorderError;

pub const VIDEO_EXTENSION: &str = "mp4";
pub const ACTIONS_EXTENSION: &str = "json";
pub const AUDIO_EXTENSION: &str = "wav";

/// The three artifacts of one flushed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    pub video: PathBuf,
    pub actions: PathBuf,
    pub audio: PathBuf,
}

/// Knows where session files live and what they are called.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    dir: PathBuf,
    video_prefix: String,
    actions_prefix: String,
    audio_prefix: String,
}

fn parse_index<'a>(prefix: &str, extension: &str, s: &'a str) -> IResult<&'a str, u32> {
    terminated(
        preceded(tuple((tag(prefix), char('-'))), u32),
        tuple((char('.'), tag(extension), eof)),
    )(s)
}

/// Pulls `N` out of `<prefix>-N.<extension>`, or `None` if the name has any
/// other shape.
pub fn session_index(file_name: &str, prefix: &str, extension: &str) -> Option<u32> {
    parse_index(prefix, extension, file_name)
        .finish()
        .ok()
        .map(|(_rest, index)| index)
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let defaults = RecorderConfig::default();
        Self {
            dir: dir.into(),
            video_prefix: defaults.video_prefix,
            actions_prefix: defaults.actions_prefix,
            audio_prefix: defaults.audio_prefix,
        }
    }

    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            dir: config.output_dir.clone(),
            video_prefix: config.video_prefix.clone(),
            actions_prefix: config.actions_prefix.clone(),
            audio_prefix: config.audio_prefix.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self, index: u32) -> SessionFiles {
        let name = |prefix: &str, ext: &str| self.dir.join(format!("{prefix}-{index}.{ext}"));
        SessionFiles {
            video: name(&self.video_prefix, VIDEO_EXTENSION),
            actions: name(&self.actions_prefix, ACTIONS_EXTENSION),
            audio: name(&self.audio_prefix, AUDIO_EXTENSION),
        }
    }

    /// The highest session index of any artifact already in the output
    /// folder, or 0 when there are none (or no folder yet). All three kinds
    /// of file are considered so that a session whose video went missing
    /// still reserves its number.
    pub fn highest_existing_index(&self) -> Result<u32, RecorderError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound || !self.dir.is_dir() => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let kinds = [
            (self.video_prefix.as_str(), VIDEO_EXTENSION),
            (self.actions_prefix.as_str(), ACTIONS_EXTENSION),
            (self.audio_prefix.as_str(), AUDIO_EXTENSION),
        ];

        let mut highest = 0;
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            for (prefix, ext) in kinds {
                if let Some(index) = session_index(file_name, prefix, ext) {
                    highest = highest.max(index);
                }
            }
        }
        Ok(highest)
    }
}
