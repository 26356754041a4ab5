//! Drive the simulator from the keyboard and record sessions.
//!
//! ```text
//! cargo run --bin drivegrape -- --preset gtx1650 --output runs
//! ```

use std::{io::Stdout, process::ExitCode, time::Duration};

use clap::Parser;
use drivegrape::{
    args::RecorderArgs,
    dummy_sim::DummySim,
    error::RecorderError,
    file_writer::FileWriter,
    gui::{CrosstermKeys, Hud, TerminalGuard},
    recorder::Recorder,
    video::FfmpegEncoder,
};
use log::{error, info, warn};
use ratatui::backend::CrosstermBackend;

fn run(args: &RecorderArgs) -> Result<(), RecorderError> {
    let config = args.resolve()?;
    for issue in config.validate()? {
        warn!("{}", issue);
    }
    info!(
        "Recording {}x{} at {} fps into {}",
        config.window_width,
        config.window_height,
        config.frame_rate,
        config.output_dir.display()
    );

    let writer = FileWriter::new(&config, FfmpegEncoder::default());
    let hold = Duration::from_millis(config.key_hold_ms);
    let mut recorder = Recorder::new(config, writer, args.seed)?;
    let mut sim = DummySim::new(args.seed);

    // restores the terminal when dropped, before main reports any error
    let terminal = TerminalGuard::enter(!args.no_hud)?;
    let mut keys = CrosstermKeys::new(terminal.release_events(), hold);

    if args.no_hud {
        recorder.run(
            &mut sim,
            &mut keys,
            None::<&mut Hud<CrosstermBackend<Stdout>>>,
        )
    } else {
        let mut hud = Hud::stdout()?;
        recorder.run(&mut sim, &mut keys, Some(&mut hud))
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = RecorderArgs::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("drivegrape: {}", e);
            ExitCode::FAILURE
        }
    }
}
