//! The recorder's main loop.
//!
//! [`Recorder`] ties the pieces together: it connects to the simulator,
//! spawns the ego vehicle with its camera and some traffic, then runs a
//! single-threaded loop paced at the action interval. Each iteration reads
//! keys, drives the vehicle, moves camera frames from the sink into the
//! session, samples the action log and redraws the status view.
//!
//! The simulator is borrowed for every call rather than owned, so the caller
//! decides what it is and when it goes away.

use std::{
    fmt,
    time::{Duration, Instant},
};

use log::{debug, error, info, trace, warn};
use rand::prelude::*;
use ratatui::backend::Backend;
use spin_sleep::LoopHelper;

use crate::action_log::Command;
use crate::config::{CameraMount, RecorderConfig};
use crate::error::RecorderError;
use crate::frame_sink::{FrameSink, Received};
use crate::gui::{Hud, HudStatus};
use crate::input::{CompositeCommand, ControlEvent, InputTranslator, KeySource};
use crate::session::{SessionController, SessionWriter};
use crate::simulator::{
    ActorId, CameraSpec, RawImage, SimError, SimulatorClient, Transform, VehicleControl,
};

const VEHICLE_PATTERN: &str = "vehicle.*";
const WALKER_PATTERN: &str = "walker.pedestrian.*";
const WALKER_CONTROLLER: &str = "controller.ai.walker";
const FPS_WINDOW: Duration = Duration::from_secs(1);
const FPS_WARNING_EVERY: Duration = Duration::from_secs(5);

/// Which of the two camera mounts is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraView {
    FirstPerson,
    ThirdPerson,
}

impl CameraView {
    pub fn toggled(self) -> Self {
        match self {
            CameraView::FirstPerson => CameraView::ThirdPerson,
            CameraView::ThirdPerson => CameraView::FirstPerson,
        }
    }

    pub fn mount(self, config: &RecorderConfig) -> CameraMount {
        match self {
            CameraView::FirstPerson => config.first_person_camera,
            CameraView::ThirdPerson => config.third_person_camera,
        }
    }
}

impl fmt::Display for CameraView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraView::FirstPerson => write!(f, "first person"),
            CameraView::ThirdPerson => write!(f, "third person"),
        }
    }
}

/// Frames per second actually delivered by the camera, measured over one
/// second windows.
#[derive(Debug)]
struct FpsMeter {
    window_start: Instant,
    received_at_start: u64,
    fps: f32,
    last_warning: Option<Instant>,
}

impl FpsMeter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            received_at_start: 0,
            fps: 0.0,
            last_warning: None,
        }
    }

    /// Returns the new rate when a window closes.
    fn update(&mut self, now: Instant, received: u64) -> Option<f32> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < FPS_WINDOW {
            return None;
        }
        let frames = received.saturating_sub(self.received_at_start);
        self.fps = (frames as f64 / elapsed.as_secs_f64()) as f32;
        self.window_start = now;
        self.received_at_start = received;
        Some(self.fps)
    }

    fn should_warn(&mut self, now: Instant) -> bool {
        let due = self
            .last_warning
            .map_or(true, |at| now.saturating_duration_since(at) >= FPS_WARNING_EVERY);
        if due {
            self.last_warning = Some(now);
        }
        due
    }
}

pub struct Recorder<W: SessionWriter> {
    config: RecorderConfig,
    controller: SessionController<W>,
    translator: InputTranslator,
    sink: FrameSink,
    rng: StdRng,
    player: Option<ActorId>,
    camera: Option<ActorId>,
    camera_view: CameraView,
    npcs: Vec<ActorId>,
    fps: FpsMeter,
    last_command: CompositeCommand,
}

impl<W: SessionWriter> Recorder<W> {
    /// A recorder writing sessions through `writer`. Random choices are
    /// reproducible when `seed` is given.
    pub fn new(
        config: RecorderConfig,
        writer: W,
        seed: Option<u64>,
    ) -> Result<Self, RecorderError> {
        let controller = SessionController::new(&config, writer)?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            translator: InputTranslator::new(config.max_steer),
            sink: FrameSink::new(config.frame_queue_capacity),
            controller,
            rng,
            player: None,
            camera: None,
            camera_view: CameraView::FirstPerson,
            npcs: Vec::new(),
            fps: FpsMeter::new(Instant::now()),
            last_command: CompositeCommand::default(),
            config,
        })
    }

    pub fn controller(&self) -> &SessionController<W> {
        &self.controller
    }

    pub fn player(&self) -> Option<ActorId> {
        self.player
    }

    pub fn camera(&self) -> Option<ActorId> {
        self.camera
    }

    pub fn camera_view(&self) -> CameraView {
        self.camera_view
    }

    pub fn npc_count(&self) -> usize {
        self.npcs.len()
    }

    /// Connect, spawn the ego vehicle with its camera, then the traffic.
    /// Anything but a traffic failure is fatal.
    pub fn setup<S: SimulatorClient>(&mut self, sim: &mut S) -> Result<(), RecorderError> {
        sim.connect(&self.config.host, self.config.port, self.config.timeout())?;

        self.spawn_player(sim)?;
        self.attach_camera(sim)?;
        self.spawn_traffic(sim);
        Ok(())
    }

    fn spawn_player<S: SimulatorClient>(&mut self, sim: &mut S) -> Result<ActorId, RecorderError> {
        let mut blueprints = sim.blueprints(&self.config.vehicle_blueprint)?;
        if blueprints.is_empty() {
            warn!(
                "No blueprint matches {}, picking a random vehicle",
                self.config.vehicle_blueprint
            );
            blueprints = sim.blueprints(VEHICLE_PATTERN)?;
        }

        let mut points = sim.spawn_points()?;
        points.shuffle(&mut self.rng);

        let mut last_error = SimError::SpawnFailed("no spawn points".to_owned());
        for (attempt, at) in points
            .iter()
            .take(self.config.spawn_retries.max(1) as usize)
            .enumerate()
        {
            let Some(blueprint) = blueprints.choose(&mut self.rng) else {
                let pattern = self.config.vehicle_blueprint.clone();
                return Err(SimError::UnknownBlueprint(pattern).into());
            };
            match sim.spawn_actor(blueprint, at, None) {
                Ok(id) => {
                    info!("Spawned {} as vehicle {} (attempt {})", blueprint, id, attempt + 1);
                    self.player = Some(id);
                    return Ok(id);
                }
                Err(e) if e.is_actor_error() => {
                    debug!("Spawn attempt {} failed: {}", attempt + 1, e);
                    last_error = e;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error.into())
    }

    fn attach_camera<S: SimulatorClient>(&mut self, sim: &mut S) -> Result<ActorId, RecorderError> {
        let Some(player) = self.player else {
            return Err(SimError::NotConnected.into());
        };
        let spec = CameraSpec {
            width: self.config.window_width,
            height: self.config.window_height,
            fov: self.config.camera_fov,
            frame_rate: self.config.frame_rate,
            mount: self.camera_view.mount(&self.config).into(),
        };
        let sink = self.sink.clone();
        let callback = Box::new(move |image: RawImage| {
            if sink.receive(image) == Received::Rejected {
                trace!("Camera image rejected");
            }
        });
        let camera = sim.attach_camera(&spec, player, callback)?;
        self.camera = Some(camera);
        Ok(camera)
    }

    /// Autopilot vehicles and wandering pedestrians. Individual failures
    /// only cost one NPC.
    fn spawn_traffic<S: SimulatorClient>(&mut self, sim: &mut S) {
        let vehicles = self.spawn_vehicles(sim);
        let walkers = self.spawn_walkers(sim);
        info!(
            "Spawned {}/{} vehicles and {}/{} pedestrians",
            vehicles, self.config.npc_vehicles, walkers, self.config.npc_pedestrians
        );
    }

    fn spawn_vehicles<S: SimulatorClient>(&mut self, sim: &mut S) -> usize {
        if self.config.npc_vehicles == 0 {
            return 0;
        }
        let (blueprints, mut points) = match (sim.blueprints(VEHICLE_PATTERN), sim.spawn_points()) {
            (Ok(b), Ok(p)) => (b, p),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Cannot place traffic: {}", e);
                return 0;
            }
        };
        points.shuffle(&mut self.rng);

        let tm_port = self.config.traffic_manager_port;
        let settings = self.config.traffic_settings();
        match sim.configure_traffic(tm_port, &settings) {
            Ok(()) => debug!(
                "Traffic manager {} keeps {:.1} m to the vehicle ahead",
                tm_port, settings.leading_vehicle_distance
            ),
            Err(e) => warn!("Traffic manager {} left at its defaults: {}", tm_port, e),
        }

        let mut spawned = 0;
        for at in points.iter() {
            if spawned == self.config.npc_vehicles {
                break;
            }
            let Some(blueprint) = blueprints.choose(&mut self.rng) else {
                break;
            };
            let Ok(id) = sim.spawn_actor(blueprint, at, None) else {
                continue;
            };
            self.npcs.push(id);
            if let Err(e) = sim.set_autopilot(id, true, self.config.traffic_manager_port) {
                debug!("Vehicle {} stays parked: {}", id, e);
            }
            spawned += 1;
        }
        spawned
    }

    fn spawn_walkers<S: SimulatorClient>(&mut self, sim: &mut S) -> usize {
        if self.config.npc_pedestrians == 0 {
            return 0;
        }
        let blueprints = match sim.blueprints(WALKER_PATTERN) {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => return 0,
            Err(e) => {
                warn!("Cannot place pedestrians: {}", e);
                return 0;
            }
        };

        let mut spawned = 0;
        for _ in 0..self.config.npc_pedestrians {
            let Some(at) = sim.random_navigation_location() else {
                continue;
            };
            let Some(blueprint) = blueprints.choose(&mut self.rng) else {
                break;
            };
            let Ok(walker) = sim.spawn_actor(blueprint, &at, None) else {
                continue;
            };
            self.npcs.push(walker);

            match sim.spawn_actor(WALKER_CONTROLLER, &Transform::default(), Some(walker)) {
                Ok(controller) => {
                    self.npcs.push(controller);
                    let speed = self.rng.gen_range(1.0..2.0);
                    if let Err(e) = sim.start_walker(controller, speed) {
                        debug!("Pedestrian {} stands still: {}", walker, e);
                    }
                }
                Err(e) => debug!("Pedestrian {} has no controller: {}", walker, e),
            }
            spawned += 1;
        }
        spawned
    }

    /// Spawn a fresh ego vehicle and camera after the old ones went away.
    fn recover_player<S: SimulatorClient>(&mut self, sim: &mut S) {
        warn!("Ego vehicle lost; spawning a new one");
        if let Some(camera) = self.camera.take() {
            let _ = sim.destroy_actor(camera);
        }
        if let Some(player) = self.player.take() {
            let _ = sim.destroy_actor(player);
        }
        let recovered = self
            .spawn_player(sim)
            .and_then(|_| self.attach_camera(sim));
        if let Err(e) = recovered {
            error!("Could not replace the ego vehicle: {}; will try again", e);
        }
    }

    fn apply_control<S: SimulatorClient>(&mut self, sim: &mut S, command: CompositeCommand) {
        let Some(player) = self.player else {
            self.recover_player(sim);
            return;
        };
        match sim.apply_control(player, &VehicleControl::from(command)) {
            Ok(()) => {}
            Err(e) if e.is_actor_error() => self.recover_player(sim),
            Err(e) => warn!("Control not applied: {}", e),
        }
    }

    fn toggle_camera<S: SimulatorClient>(&mut self, sim: &mut S) {
        self.camera_view = self.camera_view.toggled();
        let transform: Transform = self.camera_view.mount(&self.config).into();
        let result = match self.camera {
            Some(camera) => sim.set_transform(camera, &transform),
            None => Err(SimError::NotConnected),
        };
        match result {
            Ok(()) => info!("Camera switched to {}", self.camera_view),
            Err(e) if e.is_actor_error() => self.recover_player(sim),
            Err(e) => warn!("Camera not moved: {}", e),
        }
    }

    /// Move every frame the camera delivered into the active session.
    fn collect_frames(&mut self) {
        for frame in self.sink.drain() {
            self.controller.on_frame(frame);
        }
    }

    fn toggle_recording(&mut self, now: Instant) {
        if self.controller.is_recording() {
            self.collect_frames();
            self.sink.set_accepting(false);
            if let Err(e) = self.controller.end_session() {
                error!("Recording stopped but not saved: {}", e);
            }
        } else {
            match self.controller.start_session(now) {
                Ok(_) => self.sink.set_accepting(true),
                Err(e) => error!("Recording not started: {}", e),
            }
        }
    }

    /// One iteration of the main loop. Returns `false` once the operator
    /// asked to quit.
    pub fn step<S: SimulatorClient, K: KeySource>(
        &mut self,
        sim: &mut S,
        keys: &mut K,
        now: Instant,
    ) -> Result<bool, RecorderError> {
        let mut running = true;
        for event in keys.poll_keys()? {
            match self.translator.handle(event) {
                Some(ControlEvent::ToggleRecording) => self.toggle_recording(now),
                Some(ControlEvent::ToggleCamera) => self.toggle_camera(sim),
                Some(ControlEvent::Quit) => running = false,
                None => {}
            }
        }

        let command = self.translator.composite();
        self.apply_control(sim, command);
        self.last_command = command;

        self.collect_frames();
        let was_recording = self.controller.is_recording();
        if let Err(e) = self.controller.tick(now, &command) {
            error!("Recording stopped but not saved: {}", e);
        }
        if was_recording && !self.controller.is_recording() {
            self.sink.set_accepting(false);
        }

        if let Some(fps) = self.fps.update(now, self.sink.received()) {
            debug!("Camera delivering {:.1} fps", fps);
            if self.controller.is_recording()
                && fps < self.config.fps_warning_threshold
                && self.fps.should_warn(now)
            {
                warn!(
                    "Low frame rate: {:.1} fps (below {:.0}); the recording will be choppy",
                    fps, self.config.fps_warning_threshold
                );
            }
        }

        Ok(running)
    }

    pub fn status(&self, now: Instant) -> HudStatus {
        let session = self.controller.active();
        HudStatus {
            recording: session.is_some(),
            session: session.map(|s| s.index()),
            elapsed: session.map_or(0.0, |s| {
                now.saturating_duration_since(s.handle().started_at)
                    .as_secs_f64()
            }),
            frames: session.map_or(0, |s| s.frames().len()),
            actions: session.map_or(0, |s| s.actions().len()),
            dropped: session.map_or(0, |s| s.dropped_frames()) + self.sink.dropped(),
            fps: self.fps.fps,
            fps_warning: self.config.fps_warning_threshold,
            camera: self.camera_view,
            command: Command::label(&self.last_command.commands()),
            saved: self.controller.written().len(),
            pending: self.controller.pending().len(),
        }
    }

    /// Save what is left, remove every actor this recorder spawned and
    /// disconnect.
    pub fn teardown<S: SimulatorClient>(&mut self, sim: &mut S) -> Result<(), RecorderError> {
        self.collect_frames();
        self.sink.set_accepting(false);
        let saved = self.controller.shutdown();

        let actors = self
            .camera
            .take()
            .into_iter()
            .chain(self.player.take())
            .chain(self.npcs.drain(..).rev());
        for actor in actors.collect::<Vec<_>>() {
            if let Err(e) = sim.destroy_actor(actor) {
                debug!("Actor {} not destroyed: {}", actor, e);
            }
        }
        sim.disconnect();

        info!(
            "Recorded {} session(s) to {}",
            self.controller.written().len(),
            self.config.output_dir.display()
        );
        if !self.controller.pending().is_empty() {
            error!(
                "{} session(s) could not be saved and are lost",
                self.controller.pending().len()
            );
        }
        saved
    }

    /// Set up, drive until the operator quits, then tear down.
    pub fn run<S: SimulatorClient, K: KeySource, B: Backend>(
        &mut self,
        sim: &mut S,
        keys: &mut K,
        mut hud: Option<&mut Hud<B>>,
    ) -> Result<(), RecorderError> {
        if let Err(e) = self.setup(sim) {
            let _ = self.teardown(sim);
            return Err(e);
        }
        info!("Ready. Press R to start recording, Q to quit");

        let rate = 1.0 / self.config.action_interval().as_secs_f64();
        let mut pacing = LoopHelper::builder().build_with_target_rate(rate);

        let outcome = loop {
            pacing.loop_start();
            let now = Instant::now();
            match self.step(sim, keys, now) {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
            if let Some(hud) = hud.as_deref_mut() {
                if let Err(e) = hud.draw(&self.status(now)) {
                    break Err(e.into());
                }
            }
            pacing.loop_sleep();
        };

        let saved = self.teardown(sim);
        outcome.and(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_sim::DummySim;
    use crate::file_writer::FileWriter;
    use crate::input::{KeyEvent, RawKey};
    use crate::video::ListingEncoder;
    use ratatui::backend::TestBackend;
    use std::collections::VecDeque;
    use std::fs;

    /// Replays key events at fixed offsets from the first poll.
    struct ScriptedKeys {
        started: Option<Instant>,
        script: VecDeque<(Duration, KeyEvent)>,
    }

    impl ScriptedKeys {
        fn new(script: Vec<(u64, KeyEvent)>) -> Self {
            Self {
                started: None,
                script: script
                    .into_iter()
                    .map(|(ms, e)| (Duration::from_millis(ms), e))
                    .collect(),
            }
        }
    }

    impl KeySource for ScriptedKeys {
        fn poll_keys(&mut self) -> Result<Vec<KeyEvent>, RecorderError> {
            let started = *self.started.get_or_insert_with(Instant::now);
            let elapsed = started.elapsed();
            let mut due = Vec::new();
            while self.script.front().is_some_and(|(at, _)| *at <= elapsed) {
                if let Some((_, event)) = self.script.pop_front() {
                    due.push(event);
                }
            }
            Ok(due)
        }
    }

    fn tap(ms: u64, c: char) -> [(u64, KeyEvent); 2] {
        [
            (ms, KeyEvent::press(RawKey::Char(c))),
            (ms + 20, KeyEvent::release(RawKey::Char(c))),
        ]
    }

    fn small_config(dir: &std::path::Path) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            window_width: 16,
            window_height: 12,
            frame_rate: 20,
            npc_vehicles: 4,
            npc_pedestrians: 3,
            ..Default::default()
        }
    }

    fn recorder(dir: &std::path::Path) -> Recorder<FileWriter<ListingEncoder>> {
        let config = small_config(dir);
        let writer = FileWriter::new(&config, ListingEncoder::default());
        Recorder::new(config, writer, Some(1)).unwrap()
    }

    fn sim() -> DummySim {
        DummySim::new(Some(1))
    }

    #[test]
    fn camera_view_toggles() {
        let config = RecorderConfig::default();
        let view = CameraView::FirstPerson.toggled();
        assert_eq!(view, CameraView::ThirdPerson);
        assert_eq!(view.mount(&config), CameraMount::THIRD_PERSON);
        assert_eq!(view.toggled(), CameraView::FirstPerson);
    }

    #[test]
    fn fps_meter_windows() {
        let t0 = Instant::now();
        let mut meter = FpsMeter::new(t0);
        assert_eq!(meter.update(t0 + Duration::from_millis(500), 10), None);
        assert_eq!(meter.update(t0 + Duration::from_secs(1), 20), Some(20.0));
        assert_eq!(meter.update(t0 + Duration::from_secs(2), 25), Some(5.0));
        assert!(meter.should_warn(t0));
        assert!(!meter.should_warn(t0 + Duration::from_secs(1)));
        assert!(meter.should_warn(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn refused_connection_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        sim.refuse_connections(true);
        let mut keys = ScriptedKeys::new(vec![]);
        let res = r.run(&mut sim, &mut keys, None::<&mut Hud<TestBackend>>);
        assert!(matches!(
            res,
            Err(RecorderError::Simulator(SimError::Connection(_)))
        ));
    }

    #[test]
    fn spawn_gives_up_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        sim.fail_next_spawns(100);
        assert!(matches!(
            r.setup(&mut sim),
            Err(RecorderError::Simulator(SimError::SpawnFailed(_)))
        ));
    }

    #[test]
    fn spawn_retries_past_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        sim.fail_next_spawns(3);
        r.setup(&mut sim).unwrap();
        assert!(r.player().is_some());
        assert!(r.camera().is_some());
        // 4 cars, 3 pedestrians with a controller each
        assert_eq!(r.npc_count(), 10);
        assert_eq!(sim.autopilot_count(), 4);
        assert_eq!(sim.walking_count(), 3);
        let traffic = sim.traffic_settings(8000).unwrap();
        assert_eq!(traffic.leading_vehicle_distance, 2.5);
        assert!(!traffic.synchronous);
        r.teardown(&mut sim).unwrap();
        assert_eq!(sim.actor_count(), 0);
    }

    #[test]
    fn keys_drive_the_vehicle() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        r.setup(&mut sim).unwrap();
        let player = r.player().unwrap();

        let mut keys = ScriptedKeys::new(vec![
            (0, KeyEvent::press(RawKey::Char('w'))),
            (0, KeyEvent::press(RawKey::Char('a'))),
        ]);
        assert!(r.step(&mut sim, &mut keys, Instant::now()).unwrap());
        let control = sim.control_of(player).unwrap();
        assert_eq!(control.throttle, 1.0);
        assert_eq!(control.steer, -0.5);
        assert_eq!(r.status(Instant::now()).command, "ACCELERATE+LEFT");
        r.teardown(&mut sim).unwrap();
    }

    #[test]
    fn lost_vehicle_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        r.setup(&mut sim).unwrap();
        let first = r.player().unwrap();

        sim.invalidate(first);
        let mut keys = ScriptedKeys::new(vec![]);
        assert!(r.step(&mut sim, &mut keys, Instant::now()).unwrap());

        let second = r.player().unwrap();
        assert_ne!(first, second);
        assert!(sim.is_alive(second));
        assert!(sim.is_alive(r.camera().unwrap()));
        assert_eq!(sim.camera_count(), 1);
        r.teardown(&mut sim).unwrap();
    }

    #[test]
    fn camera_toggle_moves_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        r.setup(&mut sim).unwrap();

        let mut keys = ScriptedKeys::new(tap(0, 'c').to_vec());
        r.step(&mut sim, &mut keys, Instant::now()).unwrap();
        assert_eq!(r.camera_view(), CameraView::ThirdPerson);
        let camera = r.camera().unwrap();
        assert_eq!(
            sim.transform_of(camera),
            Some(Transform::from(CameraMount::THIRD_PERSON))
        );
        r.teardown(&mut sim).unwrap();
    }

    #[test]
    fn full_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();
        let mut hud = Hud::new(TestBackend::new(90, 16)).unwrap();

        let mut script = Vec::new();
        script.extend(tap(0, 'r'));
        script.push((100, KeyEvent::press(RawKey::Char('w'))));
        script.push((600, KeyEvent::release(RawKey::Char('w'))));
        script.extend(tap(1000, 'r'));
        script.extend(tap(1100, 'q'));
        let mut keys = ScriptedKeys::new(script);

        r.run(&mut sim, &mut keys, Some(&mut hud)).unwrap();

        assert_eq!(r.controller().written().len(), 1);
        assert!(r.controller().pending().is_empty());
        assert_eq!(sim.actor_count(), 0);
        assert!(!sim.is_connected());

        let files = &r.controller().written()[0];
        assert!(files.video.ends_with("recording_drive-1.mp4"));
        let video = fs::read_to_string(&files.video).unwrap();
        assert!(video.lines().count() > 1);

        let actions: Vec<crate::action_log::ActionRecord> =
            serde_json::from_slice(&fs::read(&files.actions).unwrap()).unwrap();
        // roughly one second at 20 Hz
        assert!(actions.len() >= 15 && actions.len() <= 25, "{}", actions.len());
        assert_eq!(actions[0].timestamp, 0.0);
        assert!(actions.iter().any(|a| a.command == "ACCELERATE"));
        assert!(actions.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(files.audio.exists());
    }

    #[test]
    fn quitting_mid_session_saves_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = recorder(dir.path());
        let mut sim = sim();

        let mut script = Vec::new();
        script.extend(tap(0, 'r'));
        script.push((400, KeyEvent::press(RawKey::Esc)));
        let mut keys = ScriptedKeys::new(script);
        r.run(&mut sim, &mut keys, None::<&mut Hud<TestBackend>>)
            .unwrap();

        assert_eq!(r.controller().written().len(), 1);
        assert!(dir.path().join("actions_drive-1.json").exists());
    }
}
