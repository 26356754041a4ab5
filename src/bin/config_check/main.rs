//! Check a recorder configuration without starting a recording: print the
//! effective settings and any problems with them. Then check that the
//! simulator answers, that the output folder is writable with room to
//! spare, and that the video encoder is installed.

use std::{
    fs,
    path::Path,
    process::{Command, ExitCode, Stdio},
    time::Duration,
};

use clap::Parser;
use drivegrape::{
    args::RecorderArgs,
    config::RecorderConfig,
    dummy_sim::DummySim,
    error::RecorderError,
    simulator::{SimError, SimulatorClient},
};
use log::debug;
use ron::ser::PrettyConfig;

const GIB: u64 = 1024 * 1024 * 1024;
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
enum Space {
    Plenty,
    Limited,
    Insufficient,
}

/// Sessions are a few hundred MB each; below 10 GiB a dataset won't fit.
fn judge_space(free_bytes: u64) -> Space {
    if free_bytes > 50 * GIB {
        Space::Plenty
    } else if free_bytes > 10 * GIB {
        Space::Limited
    } else {
        Space::Insufficient
    }
}

/// Connects with a short timeout and asks for the spawn points, which only
/// a fully loaded world has.
fn check_simulator<S: SimulatorClient>(
    sim: &mut S,
    config: &RecorderConfig,
) -> Result<usize, SimError> {
    sim.connect(&config.host, config.port, config.timeout().min(CHECK_TIMEOUT))?;
    let points = sim.spawn_points();
    sim.disconnect();
    Ok(points?.len())
}

fn free_space(dir: &Path) -> Result<u64, RecorderError> {
    Ok(fs2::available_space(dir)?)
}

fn check_output_dir(config: &RecorderConfig) -> Result<(), RecorderError> {
    fs::create_dir_all(&config.output_dir)?;
    // the scratch file is removed again when dropped
    let scratch = tempfile::NamedTempFile::new_in(&config.output_dir)
        .map_err(|_| RecorderError::NotWritable(config.output_dir.clone()))?;
    debug!("Wrote scratch file {}", scratch.path().display());
    Ok(())
}

fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn check(args: &RecorderArgs) -> Result<bool, RecorderError> {
    let config = args.resolve()?;
    let pretty = ron::ser::to_string_pretty(&config, PrettyConfig::default())
        .map_err(|e| RecorderError::Config(e.to_string()))?;
    println!("{}", pretty);
    println!();

    let mut ok = true;
    match config.validate() {
        Ok(issues) if issues.is_empty() => println!("[ok]   settings"),
        Ok(issues) => {
            for issue in issues {
                println!("[warn] {}", issue);
            }
        }
        Err(e) => {
            println!("[fail] {}", e);
            ok = false;
        }
    }

    match check_output_dir(&config) {
        Ok(()) => println!("[ok]   {} is writable", config.output_dir.display()),
        Err(e) => {
            println!("[fail] {}", e);
            ok = false;
        }
    }

    let mut sim = DummySim::new(args.seed);
    match check_simulator(&mut sim, &config) {
        Ok(points) => println!(
            "[ok]   simulator at {}:{} answered ({} spawn points)",
            config.host, config.port, points
        ),
        Err(e) => {
            println!("[fail] {}", e);
            ok = false;
        }
    }

    match free_space(&config.output_dir) {
        Ok(free) => {
            let gib = free as f64 / GIB as f64;
            match judge_space(free) {
                Space::Plenty => println!("[ok]   {:.1} GiB free", gib),
                Space::Limited => {
                    println!("[warn] {:.1} GiB free; plan shorter sessions", gib)
                }
                Space::Insufficient => {
                    println!("[fail] {:.1} GiB free; at least 10 GiB is needed", gib);
                    ok = false;
                }
            }
        }
        Err(e) => println!("[warn] cannot check free space: {}", e),
    }

    if ffmpeg_available() {
        println!("[ok]   ffmpeg found");
    } else {
        println!("[fail] ffmpeg not found on PATH; sessions cannot be encoded");
        ok = false;
    }

    Ok(ok)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = RecorderArgs::parse();

    match check(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("config_check: {}", e);
            ExitCode::FAILURE
        }
    }
}
