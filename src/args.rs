// Commandline argument parser using clap for DriveGrape

use std::path::PathBuf;

use clap::Parser;

use crate::config::{HardwarePreset, RecorderConfig};
use crate::error::RecorderError;

#[derive(Debug, Parser, Clone, Default)]
#[clap(version, about)]
pub struct RecorderArgs {
    /// RON file to read settings from; anything it leaves out keeps its default
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Hardware preset applied on top of the config file
    #[arg(short = 'p', long = "preset", value_enum)]
    pub preset: Option<HardwarePreset>,

    /// Simulator host
    #[arg(long)]
    pub host: Option<String>,

    /// Simulator port
    #[arg(long)]
    pub port: Option<u16>,

    /// Folder that session files are written to
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Camera image width, in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Camera image height, in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Target frame rate of the camera and the recorded video
    #[arg(long)]
    pub fps: Option<u32>,

    /// Number of autopilot vehicles to spawn
    #[arg(long)]
    pub vehicles: Option<usize>,

    /// Number of pedestrians to spawn
    #[arg(long)]
    pub pedestrians: Option<usize>,

    /// Camera field of view, in degrees
    #[arg(long)]
    pub fov: Option<f32>,

    /// Seed for spawn point and blueprint selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Don't draw the status screen; keys are still read from the terminal
    #[arg(long = "no-hud")]
    pub no_hud: bool,
}

impl RecorderArgs {
    /// Builds the effective configuration: defaults, then the config file,
    /// then the preset, then any flags given on the command line.
    pub fn resolve(&self) -> Result<RecorderConfig, RecorderError> {
        let mut config = match &self.config {
            Some(path) => RecorderConfig::from_path(path)?,
            None => RecorderConfig::default(),
        };

        if let Some(preset) = self.preset {
            config.apply_preset(preset);
        }

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(width) = self.width {
            config.window_width = width;
        }
        if let Some(height) = self.height {
            config.window_height = height;
        }
        if let Some(fps) = self.fps {
            config.frame_rate = fps;
        }
        if let Some(vehicles) = self.vehicles {
            config.npc_vehicles = vehicles;
        }
        if let Some(pedestrians) = self.pedestrians {
            config.npc_pedestrians = pedestrians;
        }
        if let Some(fov) = self.fov {
            config.camera_fov = fov;
        }

        Ok(config)
    }
}
