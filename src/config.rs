//! Recorder settings. A [`RecorderConfig`] is assembled once at startup from
//! the built-in defaults, an optional RON file, an optional
//! [`HardwarePreset`], and finally the command line, then handed by value to
//! everything that needs it.
//!
//! A configuration file only has to name the fields it changes:
//!
//! ```text
//! (
//!     output_dir: "runs",
//!     frame_rate: 15,
//!     npc_vehicles: 20,
//! )
//! ```

use std::{fs, path::Path, path::PathBuf, time::Duration};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::RecorderError;
use crate::simulator::TrafficSettings;

/// Where a camera sits relative to the vehicle it is attached to, in metres
/// and degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CameraMount {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl CameraMount {
    /// Driver's eye view, just above the windscreen.
    pub const FIRST_PERSON: CameraMount = CameraMount {
        x: 1.5,
        y: 0.0,
        z: 2.4,
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    /// Chase view behind the vehicle, looking slightly down.
    pub const THIRD_PERSON: CameraMount = CameraMount {
        x: -5.5,
        y: 0.0,
        z: 2.8,
        pitch: -15.0,
        yaw: 0.0,
        roll: 0.0,
    };
}

/// Tuned settings for the GPUs the recorder has been run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
pub enum HardwarePreset {
    /// 1920x1080 at 30 fps with dense traffic
    HighEnd,
    /// 1024x768 at 15 fps, what a GTX 1650 sustains
    Gtx1650,
    /// 800x600 at 12 fps for older cards
    LowEnd,
}

/// Every knob the recorder reads. The defaults suit a mid-range GPU.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: f32,

    pub window_width: u32,
    pub window_height: u32,
    pub frame_rate: u32,

    pub npc_vehicles: usize,
    pub npc_pedestrians: usize,
    pub traffic_manager_port: u16,
    /// Following distance, in metres, for autopilot traffic.
    pub leading_vehicle_distance: f32,
    /// Only useful when the world itself runs in synchronous mode, which the
    /// recorder does not ask for.
    pub traffic_manager_synchronous: bool,

    pub camera_fov: f32,
    pub first_person_camera: CameraMount,
    pub third_person_camera: CameraMount,

    pub vehicle_blueprint: String,
    pub spawn_retries: u32,
    pub max_steer: f32,

    /// Period of the action sampler, in milliseconds.
    pub action_interval_ms: u64,
    pub min_recording_secs: f32,
    pub max_recording_secs: f32,

    pub fps_warning_threshold: f32,
    /// Upper bound on the memory a single session's frames may occupy.
    pub memory_limit_mb: u64,
    pub frame_queue_capacity: usize,
    /// How long a key counts as held after its last press, for terminals
    /// that never report key releases.
    pub key_hold_ms: u64,

    pub output_dir: PathBuf,
    pub video_prefix: String,
    pub actions_prefix: String,
    pub audio_prefix: String,
    pub audio_sample_rate: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 2000,
            timeout_secs: 10.0,
            window_width: 1280,
            window_height: 720,
            frame_rate: 20,
            npc_vehicles: 50,
            npc_pedestrians: 30,
            traffic_manager_port: 8000,
            leading_vehicle_distance: 2.5,
            traffic_manager_synchronous: false,
            camera_fov: 110.0,
            first_person_camera: CameraMount::FIRST_PERSON,
            third_person_camera: CameraMount::THIRD_PERSON,
            vehicle_blueprint: "vehicle.tesla.model3".to_owned(),
            spawn_retries: 10,
            max_steer: 1.0,
            action_interval_ms: 50,
            min_recording_secs: 5.0,
            max_recording_secs: 300.0,
            fps_warning_threshold: 10.0,
            memory_limit_mb: 4000,
            frame_queue_capacity: 64,
            key_hold_ms: 150,
            output_dir: PathBuf::from("driving_session"),
            video_prefix: "recording_drive".to_owned(),
            actions_prefix: "actions_drive".to_owned(),
            audio_prefix: "audio_drive".to_owned(),
            audio_sample_rate: 16000,
        }
    }
}

impl RecorderConfig {
    /// Read a configuration from a RON file. Fields the file leaves out keep
    /// their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Parse a configuration from RON text.
    pub fn from_ron(text: &str) -> Result<Self, RecorderError> {
        Ok(ron::de::from_str(text)?)
    }

    /// Overwrite the display, traffic and camera settings with a hardware
    /// preset.
    pub fn apply_preset(&mut self, preset: HardwarePreset) {
        let (w, h, fps, vehicles, pedestrians, fov) = match preset {
            HardwarePreset::HighEnd => (1920, 1080, 30, 80, 50, 120.0),
            HardwarePreset::Gtx1650 => (1024, 768, 15, 25, 15, 90.0),
            HardwarePreset::LowEnd => (800, 600, 12, 15, 8, 80.0),
        };
        self.window_width = w;
        self.window_height = h;
        self.frame_rate = fps;
        self.npc_vehicles = vehicles;
        self.npc_pedestrians = pedestrians;
        self.camera_fov = fov;
    }

    /// Checks the configuration. Settings that make recording impossible
    /// are returned as an error; settings that merely hurt performance are
    /// returned as a list of warnings.
    pub fn validate(&self) -> Result<Vec<String>, RecorderError> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(RecorderError::Config(
                "window dimensions must be non-zero".to_owned(),
            ));
        }
        if self.frame_rate == 0 {
            return Err(RecorderError::Config("frame rate must be non-zero".to_owned()));
        }
        if self.action_interval_ms == 0 {
            return Err(RecorderError::Config(
                "action interval must be non-zero".to_owned(),
            ));
        }
        if !(self.timeout_secs > 0.0) {
            return Err(RecorderError::Config(
                "connection timeout must be positive".to_owned(),
            ));
        }
        if !(self.max_recording_secs > 0.0) {
            return Err(RecorderError::Config(
                "maximum recording duration must be positive".to_owned(),
            ));
        }
        if !(self.min_recording_secs >= 0.0) {
            return Err(RecorderError::Config(
                "minimum recording duration must not be negative".to_owned(),
            ));
        }
        if self.min_recording_secs > self.max_recording_secs {
            return Err(RecorderError::Config(format!(
                "minimum recording duration {}s exceeds maximum {}s",
                self.min_recording_secs, self.max_recording_secs
            )));
        }
        if self.audio_sample_rate == 0 {
            return Err(RecorderError::Config(
                "audio sample rate must be non-zero".to_owned(),
            ));
        }

        let mut issues = Vec::new();
        if self.window_width as u64 * self.window_height as u64 > 1920 * 1080 {
            issues.push("High resolution may cause performance issues".to_owned());
        }
        if self.npc_vehicles + self.npc_pedestrians > 100 {
            issues.push("High NPC count may cause performance issues".to_owned());
        }
        if self.frame_rate > 30 {
            issues.push("Frame rate above 30 may be unnecessary for dataset creation".to_owned());
        }
        Ok(issues)
    }

    /// Period of the action sampler.
    pub fn action_interval(&self) -> Duration {
        Duration::from_millis(self.action_interval_ms)
    }

    /// How long to wait for the simulator.
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }

    /// Length at which a session is stopped. An infinite or huge value
    /// means no practical limit.
    pub fn max_recording(&self) -> Duration {
        secs_to_duration(self.max_recording_secs)
    }

    pub fn traffic_settings(&self) -> TrafficSettings {
        TrafficSettings {
            leading_vehicle_distance: self.leading_vehicle_distance.max(0.0),
            synchronous: self.traffic_manager_synchronous,
        }
    }

    /// Size in bytes of one stored (packed BGR) frame.
    pub fn frame_bytes(&self) -> usize {
        self.window_width as usize * self.window_height as usize * 3
    }

    /// How many frames one session may hold before the oldest are dropped.
    pub fn max_buffered_frames(&self) -> usize {
        let budget = self.memory_limit_mb as usize * 1024 * 1024;
        (budget / self.frame_bytes().max(1)).max(1)
    }
}

/// Saturates where `Duration::from_secs_f32` would panic: negative and NaN
/// become zero, anything too large becomes `Duration::MAX`.
fn secs_to_duration(secs: f32) -> Duration {
    if !(secs > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f32(secs).unwrap_or(Duration::MAX)
}
