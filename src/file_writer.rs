//! Writes a closed session to disk.
//!
//! The video, the placeholder audio and the action log are each written to a
//! temporary file in the output folder and only renamed into place once all
//! three exist. The action log is renamed last, so a reader that sees
//! `actions_drive-N.json` can rely on the other two being complete. If any
//! step fails, files already renamed for this session are removed again and
//! the temporaries are cleaned up when dropped.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::frame_sink::Frame;
use crate::session::{Session, SessionWriter};
use crate::session_files::{OutputLayout, SessionFiles};
use crate::video::VideoEncoder;

/// Placeholder track: mono, 16 bit, silent.
fn audio_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Number of silent samples that cover `frames` frames of video.
pub fn audio_samples(frames: usize, frame_rate: u32, sample_rate: u32) -> u32 {
    if frame_rate == 0 {
        return 0;
    }
    (frames as u64 * sample_rate as u64 / frame_rate as u64) as u32
}

pub struct FileWriter<E: VideoEncoder> {
    layout: OutputLayout,
    encoder: E,
    frame_rate: u32,
    audio_sample_rate: u32,
}

impl<E: VideoEncoder> FileWriter<E> {
    pub fn new(config: &RecorderConfig, encoder: E) -> Self {
        Self {
            layout: OutputLayout::from_config(config),
            encoder,
            frame_rate: config.frame_rate,
            audio_sample_rate: config.audio_sample_rate,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    fn temp_file(&self, final_path: &Path) -> Result<NamedTempFile, RecorderError> {
        // a leading dot keeps the temporary from parsing as a session file
        let stem = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tempfile::Builder::new()
            .prefix(&format!(".{stem}."))
            .suffix(".tmp")
            .tempfile_in(self.layout.dir())
            .map_err(|e| self.classify(e))
    }

    fn classify(&self, error: io::Error) -> RecorderError {
        if error.kind() == io::ErrorKind::PermissionDenied {
            RecorderError::NotWritable(self.layout.dir().to_path_buf())
        } else {
            RecorderError::Io(error)
        }
    }

    fn write_audio(&self, file: &mut NamedTempFile, samples: u32) -> Result<(), RecorderError> {
        let mut wav = WavWriter::new(
            BufWriter::new(file.as_file_mut()),
            audio_spec(self.audio_sample_rate),
        )?;
        for _ in 0..samples {
            wav.write_sample(0i16)?;
        }
        wav.finalize()?;
        Ok(())
    }
}

/// Renames `temp` onto `target`, remembering it so a later failure can
/// undo it.
fn persist(
    temp: NamedTempFile,
    target: &Path,
    placed: &mut Vec<PathBuf>,
) -> Result<(), RecorderError> {
    temp.persist(target)?;
    placed.push(target.to_path_buf());
    Ok(())
}

fn roll_back(placed: &[PathBuf]) {
    for path in placed {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove partial output {}: {}", path.display(), e);
        }
    }
}

impl<E: VideoEncoder> SessionWriter for FileWriter<E> {
    fn flush(&mut self, session: &Session) -> Result<SessionFiles, RecorderError> {
        let files = self.layout.files(session.index());
        fs::create_dir_all(self.layout.dir()).map_err(|e| self.classify(e))?;

        // serialize before touching disk so a bad record costs nothing
        let json = serde_json::to_vec_pretty(session.actions())?;

        let frames: Vec<&Frame> = session.frames().iter().map(|f| &f.frame).collect();
        let video_tmp = self.temp_file(&files.video)?;
        let written = self
            .encoder
            .encode(video_tmp.path(), self.frame_rate, &frames)?;

        let mut audio_tmp = self.temp_file(&files.audio)?;
        let samples = audio_samples(written, self.frame_rate, self.audio_sample_rate);
        self.write_audio(&mut audio_tmp, samples)?;

        let mut actions_tmp = self.temp_file(&files.actions)?;
        actions_tmp.write_all(&json)?;
        actions_tmp.as_file().sync_all()?;

        let mut placed = Vec::with_capacity(3);
        let result = persist(video_tmp, &files.video, &mut placed)
            .and_then(|_| persist(audio_tmp, &files.audio, &mut placed))
            .and_then(|_| persist(actions_tmp, &files.actions, &mut placed));
        if let Err(e) = result {
            roll_back(&placed);
            return Err(e);
        }

        debug!(
            "Session {}: {} frames, {} actions, {} audio samples",
            session.index(),
            written,
            session.actions().len(),
            samples
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::ActionRecord;
    use crate::input::CompositeCommand;
    use crate::session::{Session, SessionController};
    use crate::video::ListingEncoder;
    use hound::WavReader;
    use std::time::{Duration, Instant};

    fn config_in(dir: &Path) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            frame_rate: 20,
            ..Default::default()
        }
    }

    fn frame_at(at: Instant, shade: u8) -> Frame {
        Frame {
            captured_at: at,
            width: 2,
            height: 2,
            pixels: vec![shade; 12],
        }
    }

    /// Records one second: 20 frames and the actions sampled alongside them.
    fn record_one_second<W: SessionWriter>(
        c: &mut SessionController<W>,
    ) -> Result<Option<SessionFiles>, RecorderError> {
        let t0 = Instant::now();
        c.start_session(t0)?;
        let held = CompositeCommand {
            throttle: 1.0,
            ..Default::default()
        };
        for i in 0..20u8 {
            let at = t0 + Duration::from_millis(i as u64 * 50);
            c.on_frame(frame_at(at, i));
            c.tick(at, &held)?;
        }
        c.end_session()
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn sample_counts() {
        assert_eq!(audio_samples(20, 20, 16000), 16000);
        assert_eq!(audio_samples(30, 20, 16000), 24000);
        assert_eq!(audio_samples(0, 20, 16000), 0);
        assert_eq!(audio_samples(5, 0, 16000), 0);
    }

    #[test]
    fn writes_all_three() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("driving_session");
        let config = config_in(&out);
        let writer = FileWriter::new(&config, ListingEncoder::default());
        let mut c = SessionController::new(&config, writer).unwrap();

        let files = record_one_second(&mut c).unwrap().unwrap();
        assert_eq!(
            listing(&out),
            vec!["actions_drive-1.json", "audio_drive-1.wav", "recording_drive-1.mp4"]
        );

        let video = fs::read_to_string(&files.video).unwrap();
        let lines: Vec<&str> = video.lines().collect();
        assert_eq!(lines[0], "fps 20");
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[1], "2x2 0");
        assert_eq!(lines[20], "2x2 19");

        let actions: Vec<ActionRecord> =
            serde_json::from_slice(&fs::read(&files.actions).unwrap()).unwrap();
        assert_eq!(actions.len(), 20);
        assert_eq!(actions[0].timestamp, 0.0);
        assert_eq!(actions[0].command, "ACCELERATE");
        assert!(actions.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let reader = WavReader::open(&files.audio).unwrap();
        assert_eq!(reader.spec(), audio_spec(16000));
        assert_eq!(reader.duration(), 16000);
    }

    #[test]
    fn action_log_is_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let writer = FileWriter::new(&config, ListingEncoder::default());
        let mut c = SessionController::new(&config, writer).unwrap();
        let files = record_one_second(&mut c).unwrap().unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&files.actions).unwrap()).unwrap();
        let first = &value.as_array().unwrap()[0];
        assert_eq!(first["timestamp"], 0.0);
        assert_eq!(first["command"], "ACCELERATE");
        assert_eq!(first["reverse"], false);
    }

    #[test]
    fn encoder_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("actions_drive-1.json"), b"old").unwrap();
        fs::write(dir.path().join("recording_drive-1.mp4"), b"old").unwrap();

        let config = config_in(dir.path());
        let writer = FileWriter::new(&config, ListingEncoder { fail: true });
        let mut c = SessionController::new(&config, writer).unwrap();

        assert!(matches!(record_one_second(&mut c), Err(RecorderError::Video(_))));
        assert_eq!(c.pending().len(), 1);
        assert_eq!(
            listing(dir.path()),
            vec!["actions_drive-1.json", "recording_drive-1.mp4"]
        );
        assert_eq!(fs::read(dir.path().join("actions_drive-1.json")).unwrap(), b"old");

        // once the encoder recovers the parked session is written as #2
        c.writer_mut().encoder.fail = false;
        let flushed = c.retry_flush().unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].actions.ends_with("actions_drive-2.json"));
        assert_eq!(fs::read(dir.path().join("actions_drive-1.json")).unwrap(), b"old");
        assert_eq!(listing(dir.path()).len(), 5);
    }

    #[test]
    fn output_path_blocked_by_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        fs::write(&blocker, b"").unwrap();

        let config = config_in(&blocker.join("sessions"));
        let writer = FileWriter::new(&config, ListingEncoder::default());
        let mut c = SessionController::new(&config, writer).unwrap();
        assert!(record_one_second(&mut c).is_err());
        assert_eq!(c.pending().len(), 1);
        assert_eq!(listing(dir.path()), vec!["taken"]);
    }

    #[test]
    fn late_failure_removes_renamed_files() {
        let dir = tempfile::tempdir().unwrap();
        // nothing can be renamed onto a directory
        fs::create_dir(dir.path().join("actions_drive-1.json")).unwrap();
        fs::write(dir.path().join("recording_drive-0.mp4"), b"keep").unwrap();

        let config = config_in(dir.path());
        let mut writer = FileWriter::new(&config, ListingEncoder::default());
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, 100);
        for i in 0..4u8 {
            let at = t0 + Duration::from_millis(i as u64 * 50);
            session.push_frame(frame_at(at, i));
            session.push_action(ActionRecord::new(i as f64 * 0.05, &CompositeCommand::default()));
        }

        assert!(writer.flush(&session).is_err());
        assert_eq!(
            listing(dir.path()),
            vec!["actions_drive-1.json", "recording_drive-0.mp4"]
        );
        assert!(dir.path().join("actions_drive-1.json").is_dir());
        assert_eq!(fs::read(dir.path().join("recording_drive-0.mp4")).unwrap(), b"keep");
    }
}
