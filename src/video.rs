//! Video encoding for recorded frames.
//!
//! The recorder does not link a codec library. [`FfmpegEncoder`] streams raw
//! BGR frames into an `ffmpeg` child process over its stdin and lets it
//! produce the MP4. Anything implementing [`VideoEncoder`] can stand in for
//! it.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use log::debug;

use crate::error::RecorderError;
use crate::frame_sink::Frame;

/// Turns an ordered run of frames into a video file.
pub trait VideoEncoder {
    /// Write `frames`, in order, to `path` as a video playing at `fps`.
    /// Every frame must have the dimensions of the first. Returns the
    /// number of frames written.
    fn encode(&mut self, path: &Path, fps: u32, frames: &[&Frame]) -> Result<usize, RecorderError>;
}

/// Encodes with an external `ffmpeg` binary, `mpeg4` in an MP4 container
/// by default.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    codec: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            codec: "mpeg4".to_owned(),
        }
    }
}

impl FfmpegEncoder {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Starts ffmpeg with its stderr going to `log`. A file never fills up
    /// the way a pipe does, so ffmpeg can't stall on its own diagnostics
    /// while we are still writing frames.
    fn spawn(
        &self,
        path: &Path,
        fps: u32,
        (width, height): (u32, u32),
        log: &File,
    ) -> Result<Child, RecorderError> {
        Command::new(&self.program)
            .args(["-y", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "-", "-an"])
            .arg("-c:v")
            .arg(&self.codec)
            .args(["-pix_fmt", "yuv420p"])
            // the target is a temporary file, so the container can't be
            // guessed from its extension
            .args(["-f", "mp4"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log.try_clone()?))
            .spawn()
            .map_err(|e| {
                RecorderError::Video(format!("cannot start {}: {}", self.program.display(), e))
            })
    }
}

/// Whatever ffmpeg wrote to its log, trimmed.
fn read_log(log: &mut File) -> String {
    let mut text = String::new();
    if log.seek(SeekFrom::Start(0)).is_ok() {
        let _ = log.read_to_string(&mut text);
    }
    text.trim().to_owned()
}

fn abort(mut child: Child, msg: String) -> RecorderError {
    let _ = child.kill();
    let _ = child.wait();
    RecorderError::Video(msg)
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&mut self, path: &Path, fps: u32, frames: &[&Frame]) -> Result<usize, RecorderError> {
        let Some(first) = frames.first() else {
            return Err(RecorderError::Video("no frames to encode".to_owned()));
        };
        let (width, height) = (first.width, first.height);

        let mut log = tempfile::tempfile()?;
        let mut child = self.spawn(path, fps, (width, height), &log)?;
        let Some(mut stdin) = child.stdin.take() else {
            return Err(abort(child, "ffmpeg stdin unavailable".to_owned()));
        };

        for (i, frame) in frames.iter().enumerate() {
            if (frame.width, frame.height) != (width, height) {
                drop(stdin);
                return Err(abort(
                    child,
                    format!(
                        "frame {} is {}x{}, expected {}x{}",
                        i, frame.width, frame.height, width, height
                    ),
                ));
            }
            if let Err(e) = stdin.write_all(&frame.pixels) {
                drop(stdin);
                return Err(abort(child, format!("writing frame {} to ffmpeg: {}", i, e)));
            }
        }
        drop(stdin);

        let status = child.wait()?;
        if !status.success() {
            return Err(RecorderError::Video(format!(
                "ffmpeg exited with {}: {}",
                status,
                read_log(&mut log)
            )));
        }

        debug!(
            "Encoded {} frames ({}x{} @ {} fps) to {}",
            frames.len(),
            width,
            height,
            fps,
            path.display()
        );
        Ok(frames.len())
    }
}

/// An encoder that writes a plain-text description of the frames it was
/// given, so tests can check ordering without a real codec.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ListingEncoder {
    pub fail: bool,
}

#[cfg(test)]
impl VideoEncoder for ListingEncoder {
    fn encode(&mut self, path: &Path, fps: u32, frames: &[&Frame]) -> Result<usize, RecorderError> {
        if self.fail {
            return Err(RecorderError::Video("encoder told to fail".to_owned()));
        }
        let mut listing = format!("fps {}\n", fps);
        for frame in frames {
            listing.push_str(&format!(
                "{}x{} {}\n",
                frame.width,
                frame.height,
                frame.pixels.first().copied().unwrap_or(0)
            ));
        }
        std::fs::write(path, listing)?;
        Ok(frames.len())
    }
}
