//! Recording sessions and the controller that opens, fills and flushes them.
//!
//! A [`Session`] is created when recording is toggled on and lives until it
//! has been written to disk. Frames and actions are stamped on the same clock,
//! seconds since the session started. At most one session is active at a
//! time; a session whose flush failed is parked in memory until
//! [`SessionController::retry_flush`] manages to write it.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::action_log::{ActionLogger, ActionRecord};
use crate::alignment::worst_gap;
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::frame_sink::Frame;
use crate::input::CompositeCommand;
use crate::session_files::{OutputLayout, SessionFiles};

const DROP_WARNING_EVERY: u64 = 20;

/// A frame placed on its session's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFrame {
    pub timestamp: f64,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

/// Identifies the session that [`SessionController::start_session`] opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub index: u32,
    pub started_at: Instant,
}

/// One bounded recording interval.
#[derive(Debug)]
pub struct Session {
    index: u32,
    started_at: Instant,
    state: SessionState,
    frames: VecDeque<SessionFrame>,
    actions: Vec<ActionRecord>,
    max_frames: usize,
    dropped_frames: u64,
}

impl Session {
    pub fn new(index: u32, started_at: Instant, max_frames: usize) -> Self {
        Self {
            index,
            started_at,
            state: SessionState::Active,
            frames: VecDeque::new(),
            actions: Vec::new(),
            max_frames: max_frames.max(1),
            dropped_frames: 0,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            index: self.index,
            started_at: self.started_at,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames(&self) -> &VecDeque<SessionFrame> {
        &self.frames
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn frame_times(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.timestamp).collect()
    }

    /// Length of the recording on the session clock: the latest timestamp
    /// of either stream.
    pub fn duration(&self) -> f64 {
        let last_frame = self.frames.back().map_or(0.0, |f| f.timestamp);
        let last_action = self.actions.last().map_or(0.0, |a| a.timestamp);
        last_frame.max(last_action)
    }

    /// Add a frame, re-based onto the session clock. Frames captured before
    /// the session started are ignored. When the buffer is at its bound the
    /// oldest frame makes room.
    pub(crate) fn push_frame(&mut self, frame: Frame) {
        let Some(offset) = frame.captured_at.checked_duration_since(self.started_at) else {
            debug!("Ignoring frame captured before session {} began", self.index);
            return;
        };

        if self.frames.len() >= self.max_frames {
            self.frames.pop_front();
            self.dropped_frames += 1;
            if self.dropped_frames == 1 || self.dropped_frames % DROP_WARNING_EVERY == 0 {
                warn!(
                    "Session {} hit its memory bound of {} frames; dropped oldest ({} so far)",
                    self.index, self.max_frames, self.dropped_frames
                );
            }
        }

        self.frames.push_back(SessionFrame {
            timestamp: offset.as_secs_f64(),
            frame,
        });
    }

    pub(crate) fn push_action(&mut self, record: ActionRecord) {
        debug_assert!(self
            .actions
            .last()
            .map_or(true, |last| last.timestamp <= record.timestamp));
        self.actions.push(record);
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// Something that can persist a closed session.
pub trait SessionWriter {
    fn flush(&mut self, session: &Session) -> Result<SessionFiles, RecorderError>;
}

/// Owns the active session and decides when it starts, what goes into it
/// and when it is written out.
pub struct SessionController<W: SessionWriter> {
    writer: W,
    layout: OutputLayout,
    logger: ActionLogger,
    last_index: u32,
    active: Option<Session>,
    pending: Vec<Session>,
    written: Vec<SessionFiles>,
    max_frames: usize,
    max_duration: Duration,
    min_duration: f64,
}

impl<W: SessionWriter> SessionController<W> {
    /// Builds a controller writing through `writer`. The configuration must
    /// pass [`RecorderConfig::validate`]. The output folder is scanned so
    /// numbering continues after any earlier run.
    pub fn new(config: &RecorderConfig, writer: W) -> Result<Self, RecorderError> {
        config.validate()?;
        let layout = OutputLayout::from_config(config);
        let last_index = layout.highest_existing_index()?;
        if last_index > 0 {
            info!(
                "Found existing recordings in {}; next will be #{}",
                layout.dir().display(),
                last_index + 1
            );
        }

        Ok(Self {
            writer,
            layout,
            logger: ActionLogger::new(config.action_interval()),
            last_index,
            active: None,
            pending: Vec::new(),
            written: Vec::new(),
            max_frames: config.max_buffered_frames(),
            max_duration: config.max_recording(),
            min_duration: config.min_recording_secs as f64,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Sessions that were closed but could not be written yet.
    pub fn pending(&self) -> &[Session] {
        &self.pending
    }

    /// Every file set written so far by this controller.
    pub fn written(&self) -> &[SessionFiles] {
        &self.written
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Opens a new session at `now` with the next unused index. If a session
    /// is already active its handle is returned instead. Sessions still
    /// waiting to be written get another attempt first.
    pub fn start_session(&mut self, now: Instant) -> Result<SessionHandle, RecorderError> {
        if let Some(session) = &self.active {
            return Ok(session.handle());
        }

        if !self.pending.is_empty() {
            if let Err(e) = self.retry_flush() {
                warn!(
                    "{} earlier session(s) still unsaved ({}); recording anyway",
                    self.pending.len(),
                    e
                );
            }
        }

        let on_disk = self.layout.highest_existing_index()?;
        let index = self.last_index.max(on_disk) + 1;
        self.last_index = index;

        let session = Session::new(index, now, self.max_frames);
        let handle = session.handle();
        self.active = Some(session);
        self.logger.start(now);

        info!("Recording started - session {}", index);
        Ok(handle)
    }

    /// Flips recording on or off and returns the new state. Turning it off
    /// writes the session; if that fails the error is returned, recording is
    /// still off, and the data waits in memory for a retry.
    pub fn toggle_recording(&mut self, now: Instant) -> Result<bool, RecorderError> {
        if self.is_recording() {
            self.end_session()?;
            Ok(false)
        } else {
            self.start_session(now)?;
            Ok(true)
        }
    }

    /// Adds a frame to the active session; does nothing while not recording.
    pub fn on_frame(&mut self, frame: Frame) {
        if let Some(session) = &mut self.active {
            session.push_frame(frame);
        }
    }

    /// Adds an action to the active session; does nothing while not
    /// recording.
    pub fn on_action(&mut self, record: ActionRecord) {
        if let Some(session) = &mut self.active {
            session.push_action(record);
        }
    }

    /// Runs the action sampler up to `now` and ends the session if it has
    /// reached the maximum recording length.
    pub fn tick(&mut self, now: Instant, command: &CompositeCommand) -> Result<(), RecorderError> {
        for record in self.logger.poll(now, command) {
            self.on_action(record);
        }

        let over_limit = self
            .active
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.started_at) >= self.max_duration);
        if over_limit {
            warn!(
                "Session reached the {:.0}s limit; stopping",
                self.max_duration.as_secs_f32()
            );
            self.end_session()?;
        }
        Ok(())
    }

    /// Closes and writes the active session. Returns the written files, or
    /// `None` when there was no active session or it captured no frames.
    /// Calling it again after a session ended does nothing.
    pub fn end_session(&mut self) -> Result<Option<SessionFiles>, RecorderError> {
        let Some(mut session) = self.active.take() else {
            return Ok(None);
        };
        self.logger.stop();
        session.close();
        self.log_summary(&session);

        if session.frames.is_empty() {
            warn!(
                "Session {} captured no frames; nothing written",
                session.index
            );
            return Ok(None);
        }

        match self.writer.flush(&session) {
            Ok(files) => {
                info!(
                    "Session {} saved: {}, {}, {}",
                    session.index,
                    files.video.display(),
                    files.actions.display(),
                    files.audio.display()
                );
                self.written.push(files.clone());
                Ok(Some(files))
            }
            Err(e) => {
                error!(
                    "Could not save session {} ({}); keeping it in memory for a retry",
                    session.index, e
                );
                self.pending.push(session);
                Err(e)
            }
        }
    }

    /// Tries to write every session whose flush failed before. Sessions that
    /// still fail stay pending, and the last error is returned.
    pub fn retry_flush(&mut self) -> Result<Vec<SessionFiles>, RecorderError> {
        let mut flushed = Vec::new();
        let mut last_error = None;

        for session in std::mem::take(&mut self.pending) {
            match self.writer.flush(&session) {
                Ok(files) => {
                    info!("Session {} saved on retry", session.index);
                    self.written.push(files.clone());
                    flushed.push(files);
                }
                Err(e) => {
                    warn!("Session {} still cannot be saved: {}", session.index, e);
                    last_error = Some(e);
                    self.pending.push(session);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Ends any active session and makes one last attempt at pending ones.
    pub fn shutdown(&mut self) -> Result<(), RecorderError> {
        let ended = self.end_session();
        let retried = if self.pending.is_empty() {
            Ok(Vec::new())
        } else {
            self.retry_flush()
        };
        ended?;
        retried?;
        Ok(())
    }

    fn log_summary(&self, session: &Session) {
        let duration = session.duration();
        info!(
            "Recording stopped - session {}: {:.2}s, {} frames, {} actions, {} dropped",
            session.index,
            duration,
            session.frames.len(),
            session.actions.len(),
            session.dropped_frames
        );

        if !session.frames.is_empty() && duration < self.min_duration {
            warn!(
                "Session {} is shorter than the {:.1}s minimum sample length",
                session.index, self.min_duration
            );
        }

        let gap = worst_gap(&session.frame_times(), &session.actions);
        if gap > 2.0 * self.logger.interval().as_secs_f64() {
            warn!(
                "Session {}: a frame is {:.3}s from its nearest action; the frame rate was likely too low",
                session.index, gap
            );
        }
    }
}
