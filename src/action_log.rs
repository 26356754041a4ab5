//! Timestamped driving actions, and the fixed-rate sampler that produces
//! them.
//!
//! The sampler is a schedule rather than a timer: tick `k` of a session is
//! stamped `k * interval` no matter when the main loop actually gets round
//! to it. If the loop stalls, the missed ticks are filled in with the
//! command that is current when it resumes, so the log stays uniformly
//! sampled and always starts at `t = 0`.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::input::CompositeCommand;

/// One element of the action vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Accelerate,
    Brake,
    Left,
    Right,
    Reverse,
    Handbrake,
    /// Nothing held
    #[serde(rename = "NONE")]
    NoInput,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Accelerate => "ACCELERATE",
            Command::Brake => "BRAKE",
            Command::Left => "LEFT",
            Command::Right => "RIGHT",
            Command::Reverse => "REVERSE",
            Command::Handbrake => "HANDBRAKE",
            Command::NoInput => "NONE",
        }
    }

    /// Joins commands into the label stored in the action log, e.g.
    /// `ACCELERATE+RIGHT`. An empty list is `NONE`.
    pub fn label(commands: &[Command]) -> String {
        if commands.is_empty() {
            return Command::NoInput.as_str().to_owned();
        }
        commands
            .iter()
            .map(Command::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sampled control input. `timestamp` is seconds since the session
/// started, on the same clock as the session's frames.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionRecord {
    pub timestamp: f64,
    pub command: String,
    pub steer: f32,
    pub throttle: f32,
    pub brake: f32,
    pub reverse: bool,
    pub hand_brake: bool,
}

impl ActionRecord {
    pub fn new(timestamp: f64, composite: &CompositeCommand) -> Self {
        Self {
            timestamp: round_millis(timestamp),
            command: Command::label(&composite.commands()),
            steer: composite.steer,
            throttle: composite.throttle,
            brake: composite.brake,
            reverse: composite.reverse,
            hand_brake: composite.hand_brake,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.command == Command::NoInput.as_str()
    }
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Samples the composite command every `interval` while a session is
/// running.
#[derive(Debug)]
pub struct ActionLogger {
    interval: Duration,
    started_at: Option<Instant>,
    ticks: u32,
}

impl ActionLogger {
    /// `interval` is raised to at least a millisecond; a zero period would
    /// never catch up with the clock.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            started_at: None,
            ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin a new schedule with tick 0 due at `at`.
    pub fn start(&mut self, at: Instant) {
        self.started_at = Some(at);
        self.ticks = 0;
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// When the next record is due, if the logger is running.
    pub fn next_due(&self) -> Option<Instant> {
        self.started_at.map(|start| start + self.interval * self.ticks)
    }

    /// Emit one record for every tick that is due at `now`, each carrying
    /// `command`. Returns nothing while stopped.
    pub fn poll(&mut self, now: Instant, command: &CompositeCommand) -> Vec<ActionRecord> {
        let mut records = Vec::new();
        let Some(start) = self.started_at else {
            return records;
        };

        loop {
            let offset = self.interval * self.ticks;
            if start + offset > now {
                break;
            }
            records.push(ActionRecord::new(offset.as_secs_f64(), command));
            self.ticks += 1;
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(50);

    fn accelerate_right() -> CompositeCommand {
        CompositeCommand {
            throttle: 1.0,
            steer: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn labels() {
        assert_eq!(Command::label(&[]), "NONE");
        assert_eq!(
            Command::label(&[Command::Accelerate, Command::Right]),
            "ACCELERATE+RIGHT"
        );
        assert_eq!(Command::Handbrake.to_string(), "HANDBRAKE");
    }

    #[test]
    fn command_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&Command::Accelerate).unwrap(),
            "\"ACCELERATE\""
        );
        assert_eq!(serde_json::to_string(&Command::NoInput).unwrap(), "\"NONE\"");
    }

    #[test]
    fn record_fields() {
        let record = ActionRecord::new(1.23456, &accelerate_right());
        assert_eq!(record.timestamp, 1.235);
        assert_eq!(record.command, "ACCELERATE+RIGHT");
        assert!(!record.is_idle());

        let idle = ActionRecord::new(0.0, &CompositeCommand::default());
        assert!(idle.is_idle());
    }

    #[test]
    fn stopped_logger_emits_nothing() {
        let mut logger = ActionLogger::new(INTERVAL);
        assert!(logger
            .poll(Instant::now(), &CompositeCommand::default())
            .is_empty());
        assert_eq!(logger.next_due(), None);
    }

    #[test]
    fn first_record_at_zero() {
        let t0 = Instant::now();
        let mut logger = ActionLogger::new(INTERVAL);
        logger.start(t0);
        let records = logger.poll(t0, &CompositeCommand::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 0.0);
        assert_eq!(records[0].command, "NONE");
        assert_eq!(logger.next_due(), Some(t0 + INTERVAL));
    }

    #[test]
    fn count_follows_duration() {
        let t0 = Instant::now();
        for duration_ms in [0u64, 49, 50, 51, 1000, 1234, 5000] {
            let mut logger = ActionLogger::new(INTERVAL);
            logger.start(t0);
            let mut records = Vec::new();
            // poll at an irregular cadence, as a busy main loop would
            let mut elapsed = 0;
            while elapsed < duration_ms {
                records.extend(logger.poll(t0 + Duration::from_millis(elapsed), &accelerate_right()));
                elapsed += 37;
            }
            records.extend(logger.poll(
                t0 + Duration::from_millis(duration_ms),
                &accelerate_right(),
            ));

            let expected = (duration_ms / 50) as i64;
            let got = records.len() as i64;
            assert!(
                (got - expected).abs() <= 1,
                "{duration_ms}ms gave {got} records"
            );
            assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            assert_eq!(records[0].timestamp, 0.0);
        }
    }

    #[test]
    fn stall_is_filled_uniformly() {
        let t0 = Instant::now();
        let mut logger = ActionLogger::new(INTERVAL);
        logger.start(t0);
        let records = logger.poll(t0 + Duration::from_millis(260), &accelerate_right());
        let stamps: Vec<f64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 0.05, 0.1, 0.15, 0.2, 0.25]);
    }

    #[test]
    fn zero_interval_still_terminates() {
        let t0 = Instant::now();
        let mut logger = ActionLogger::new(Duration::ZERO);
        assert_eq!(logger.interval(), MIN_INTERVAL);
        logger.start(t0);
        let records = logger.poll(t0 + Duration::from_millis(10), &accelerate_right());
        assert_eq!(records.len(), 11);
    }

    #[test]
    fn restart_resets_clock() {
        let t0 = Instant::now();
        let mut logger = ActionLogger::new(INTERVAL);
        logger.start(t0);
        logger.poll(t0 + Duration::from_millis(500), &accelerate_right());
        logger.stop();
        assert!(!logger.is_running());

        let t1 = t0 + Duration::from_secs(2);
        logger.start(t1);
        let records = logger.poll(t1, &accelerate_right());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 0.0);
    }
}
