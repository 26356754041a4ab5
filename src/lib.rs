//! DriveGrape records human driving demonstrations from a driving simulator
//! as training data for vision-language models.
//!
//! An operator drives the ego vehicle from the keyboard. While recording is
//! toggled on, every camera frame and a 20 Hz log of the control inputs are
//! collected into a session, and when the session ends it is written out as
//! three files: `recording_drive-N.mp4`, `actions_drive-N.json` and a
//! placeholder `audio_drive-N.wav`.
//!
//! The pieces, roughly in the order data flows through them:
//!
//! - [`simulator`] is the client interface to the simulator, with
//!   [`dummy_sim`] as an in-process implementation.
//! - [`frame_sink`] takes images from the camera thread.
//! - [`input`] turns key events into a control vector, which
//!   [`action_log`] samples on a fixed schedule.
//! - [`session`] owns the recording lifecycle and hands finished sessions to
//!   [`file_writer`], which uses [`video`] for the MP4.
//! - [`recorder`] runs the main loop and [`gui`] draws its status view.

pub mod action_log;
pub mod alignment;
pub mod args;
pub mod config;
pub mod dummy_sim;
pub mod error;
pub mod file_writer;
pub mod frame_sink;
pub mod gui;
pub mod input;
pub mod recorder;
pub mod session;
pub mod session_files;
pub mod simulator;
pub mod video;
