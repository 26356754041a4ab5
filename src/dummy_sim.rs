//! An in-process stand-in for the driving simulator.
//!
//! `DummySim` keeps a small world of actors behind a mutex and runs one
//! background thread per attached camera. Each camera thread renders a
//! synthetic BGRA test pattern at the requested frame rate and hands it to
//! the callback, just as the real sensor thread would. The pattern scrolls
//! with the parent vehicle's throttle and shifts with its steering, so a
//! recording made against it shows the inputs that were applied.
//!
//! A few control functions let tests provoke the failures the recorder has to
//! survive: refused connections, spawn collisions and actors that disappear
//! server side.

use rand::prelude::*;
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::simulator::{
    blueprint_matches, ActorId, CameraSpec, ImageCallback, RawImage, SimError, SimulatorClient,
    TrafficSettings, Transform, VehicleControl,
};

const BLUEPRINTS: &[&str] = &[
    "vehicle.tesla.model3",
    "vehicle.audi.a2",
    "vehicle.lincoln.mkz_2020",
    "vehicle.nissan.patrol",
    "vehicle.mini.cooper_s",
    "walker.pedestrian.0001",
    "walker.pedestrian.0002",
    "walker.pedestrian.0003",
    "walker.pedestrian.0004",
    "controller.ai.walker",
    "sensor.camera.rgb",
];

const CAMERA_BLUEPRINT: &str = "sensor.camera.rgb";
const SPAWN_POINT_COUNT: usize = 24;
// vehicles closer than this collide on spawn
const COLLISION_RADIUS: f32 = 2.0;

#[derive(Debug, Clone)]
struct Actor {
    blueprint: String,
    transform: Transform,
    parent: Option<ActorId>,
    control: VehicleControl,
    autopilot: bool,
    walking: bool,
}

#[derive(Debug, Default)]
struct World {
    actors: HashMap<ActorId, Actor>,
    next_id: ActorId,
}

impl World {
    fn vehicle_near(&self, at: &Transform) -> bool {
        self.actors.values().any(|a| {
            a.parent.is_none()
                && a.blueprint.starts_with("vehicle.")
                && (a.transform.x - at.x).hypot(a.transform.y - at.y) < COLLISION_RADIUS
        })
    }
}

enum Signal {
    Stop,
}

struct CameraThread {
    actor: ActorId,
    tx: mpsc::Sender<Signal>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraThread {
    fn stop(&mut self) {
        // the thread may already have exited on its own
        let _ = self.tx.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct DummySim {
    world: Arc<Mutex<World>>,
    cameras: Vec<CameraThread>,
    traffic_managers: HashMap<u16, TrafficSettings>,
    connected: bool,
    refuse_connections: bool,
    failing_spawns: u32,
    rng: StdRng,
}

impl DummySim {
    /// A simulator whose random choices are reproducible when `seed` is
    /// given.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DummySim {
            world: Arc::new(Mutex::new(World::default())),
            cameras: Vec::new(),
            traffic_managers: HashMap::new(),
            connected: false,
            refuse_connections: false,
            failing_spawns: 0,
            rng,
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> Result<(), SimError> {
        if self.connected {
            Ok(())
        } else {
            Err(SimError::NotConnected)
        }
    }

    fn with_actor<T>(
        &self,
        id: ActorId,
        f: impl FnOnce(&mut Actor) -> T,
    ) -> Result<T, SimError> {
        self.ensure_connected()?;
        let mut world = self.world();
        let actor = world.actors.get_mut(&id).ok_or(SimError::StaleActor(id))?;
        Ok(f(actor))
    }

    fn stop_cameras(&mut self, which: impl Fn(ActorId) -> bool) {
        for camera in self.cameras.iter_mut().filter(|c| which(c.actor)) {
            camera.stop();
        }
        self.cameras.retain(|c| c.handle.is_some());
    }
}

// Control functions beyond the client API, for exercising failure paths.
impl DummySim {
    /// Make every following `connect` fail, as if no server were running.
    pub fn refuse_connections(&mut self, refuse: bool) {
        self.refuse_connections = refuse;
    }

    /// Make the next `count` spawn attempts fail with a collision.
    pub fn fail_next_spawns(&mut self, count: u32) {
        self.failing_spawns = count;
    }

    /// Remove an actor behind the client's back, the way the server does
    /// when a vehicle is destroyed in the world.
    pub fn invalidate(&mut self, actor: ActorId) {
        self.world().actors.remove(&actor);
        info!("Actor {} removed from the world", actor);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn actor_count(&self) -> usize {
        self.world().actors.len()
    }

    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.world().actors.contains_key(&actor)
    }

    /// The control most recently applied to `vehicle`.
    pub fn control_of(&self, vehicle: ActorId) -> Option<VehicleControl> {
        self.world().actors.get(&vehicle).map(|a| a.control)
    }

    pub fn transform_of(&self, actor: ActorId) -> Option<Transform> {
        self.world().actors.get(&actor).map(|a| a.transform)
    }

    pub fn autopilot_count(&self) -> usize {
        self.world().actors.values().filter(|a| a.autopilot).count()
    }

    pub fn walking_count(&self) -> usize {
        self.world().actors.values().filter(|a| a.walking).count()
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    /// How the traffic manager on `tm_port` was last configured.
    pub fn traffic_settings(&self, tm_port: u16) -> Option<TrafficSettings> {
        self.traffic_managers.get(&tm_port).copied()
    }
}

impl SimulatorClient for DummySim {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), SimError> {
        if self.refuse_connections {
            return Err(SimError::Connection(format!(
                "no server at {}:{} within {:.1}s",
                host,
                port,
                timeout.as_secs_f32()
            )));
        }
        self.connected = true;
        info!("Connected to simulated world at {}:{}", host, port);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop_cameras(|_| true);
        if self.connected {
            debug!("Disconnected from simulated world");
        }
        self.connected = false;
    }

    fn blueprints(&self, pattern: &str) -> Result<Vec<String>, SimError> {
        self.ensure_connected()?;
        Ok(BLUEPRINTS
            .iter()
            .filter(|name| blueprint_matches(pattern, name))
            .map(|name| name.to_string())
            .collect())
    }

    fn spawn_points(&self) -> Result<Vec<Transform>, SimError> {
        self.ensure_connected()?;
        // two rows of kerbside spots, 12 m apart
        Ok((0..SPAWN_POINT_COUNT)
            .map(|i| Transform {
                x: (i / 2) as f32 * 12.0,
                y: if i % 2 == 0 { -3.5 } else { 3.5 },
                z: 0.3,
                yaw: if i % 2 == 0 { 0.0 } else { 180.0 },
                ..Default::default()
            })
            .collect())
    }

    fn random_navigation_location(&mut self) -> Option<Transform> {
        if !self.connected {
            return None;
        }
        Some(Transform {
            x: self.rng.gen_range(-50.0..150.0),
            y: self.rng.gen_range(-20.0..20.0),
            z: 1.0,
            ..Default::default()
        })
    }

    fn spawn_actor(
        &mut self,
        blueprint: &str,
        at: &Transform,
        parent: Option<ActorId>,
    ) -> Result<ActorId, SimError> {
        self.ensure_connected()?;
        if !BLUEPRINTS.contains(&blueprint) {
            return Err(SimError::UnknownBlueprint(blueprint.to_owned()));
        }
        if self.failing_spawns > 0 {
            self.failing_spawns -= 1;
            return Err(SimError::SpawnFailed(
                "collision at spawn position".to_owned(),
            ));
        }

        let mut world = self.world();
        if let Some(parent) = parent {
            if !world.actors.contains_key(&parent) {
                return Err(SimError::StaleActor(parent));
            }
        } else if blueprint.starts_with("vehicle.") && world.vehicle_near(at) {
            return Err(SimError::SpawnFailed(format!(
                "collision at ({:.1}, {:.1})",
                at.x, at.y
            )));
        }

        world.next_id += 1;
        let id = world.next_id;
        world.actors.insert(
            id,
            Actor {
                blueprint: blueprint.to_owned(),
                transform: *at,
                parent,
                control: VehicleControl::default(),
                autopilot: false,
                walking: false,
            },
        );
        debug!("Spawned {} as actor {}", blueprint, id);
        Ok(id)
    }

    fn destroy_actor(&mut self, actor: ActorId) -> Result<(), SimError> {
        self.ensure_connected()?;
        self.stop_cameras(|id| id == actor);
        self.world()
            .actors
            .remove(&actor)
            .map(|_| ())
            .ok_or(SimError::StaleActor(actor))
    }

    fn configure_traffic(
        &mut self,
        tm_port: u16,
        settings: &TrafficSettings,
    ) -> Result<(), SimError> {
        self.ensure_connected()?;
        if settings.synchronous {
            debug!("Traffic manager {} runs synchronously", tm_port);
        }
        self.traffic_managers.insert(tm_port, *settings);
        Ok(())
    }

    fn set_autopilot(
        &mut self,
        vehicle: ActorId,
        enabled: bool,
        tm_port: u16,
    ) -> Result<(), SimError> {
        self.with_actor(vehicle, |a| a.autopilot = enabled)?;
        debug!(
            "Autopilot {} for {} on traffic manager {}",
            if enabled { "on" } else { "off" },
            vehicle,
            tm_port
        );
        Ok(())
    }

    fn start_walker(&mut self, controller: ActorId, max_speed: f32) -> Result<(), SimError> {
        self.with_actor(controller, |a| {
            a.walking = true;
            a.control.throttle = max_speed;
        })
    }

    fn attach_camera(
        &mut self,
        spec: &CameraSpec,
        parent: ActorId,
        mut callback: ImageCallback,
    ) -> Result<ActorId, SimError> {
        let camera = self.spawn_actor(CAMERA_BLUEPRINT, &spec.mount, Some(parent))?;

        let (tx, rx) = mpsc::channel::<Signal>();
        let world = Arc::clone(&self.world);
        let (width, height) = (spec.width, spec.height);
        let period = Duration::from_secs_f64(1.0 / spec.frame_rate.max(1) as f64);

        let handle = thread::spawn(move || {
            let mut frame = 0u64;
            let mut phase = 0.0f32;
            loop {
                match rx.recv_timeout(period) {
                    Ok(Signal::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }

                let control = {
                    let world = world.lock().unwrap_or_else(PoisonError::into_inner);
                    if !world.actors.contains_key(&camera) {
                        break;
                    }
                    match world.actors.get(&parent) {
                        Some(vehicle) => vehicle.control,
                        // the vehicle is gone; keep streaming a still picture
                        None => VehicleControl::default(),
                    }
                };

                let direction = if control.reverse { -1.0 } else { 1.0 };
                phase += direction * (control.throttle - control.brake).max(0.0) * 8.0;
                callback(RawImage {
                    frame,
                    width,
                    height,
                    data: render(width, height, phase, control.steer),
                });
                frame += 1;
            }
        });

        self.cameras.push(CameraThread {
            actor: camera,
            tx,
            handle: Some(handle),
        });
        info!(
            "Camera {} attached to {} ({}x{} @ {} fps)",
            camera, parent, spec.width, spec.height, spec.frame_rate
        );
        Ok(camera)
    }

    fn set_transform(&mut self, actor: ActorId, transform: &Transform) -> Result<(), SimError> {
        self.with_actor(actor, |a| a.transform = *transform)
    }

    fn apply_control(
        &mut self,
        vehicle: ActorId,
        control: &VehicleControl,
    ) -> Result<(), SimError> {
        self.with_actor(vehicle, |a| a.control = *control)
    }
}

impl Drop for DummySim {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// A BGRA test pattern: blue ramps along x and scrolls with `phase`, green
/// ramps along y, red leans with `steer`.
fn render(width: u32, height: u32, phase: f32, steer: f32) -> Vec<u8> {
    let shift = phase as i64;
    let red = (128.0 + steer.clamp(-1.0, 1.0) * 127.0) as u8;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        let green = (y * 255 / height.max(1)) as u8;
        for x in 0..width {
            let blue = (x as i64 + shift).rem_euclid(256) as u8;
            data.extend_from_slice(&[blue, green, red, 255]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_sink::FrameSink;
    use std::time::Instant;

    fn connected() -> DummySim {
        let mut sim = DummySim::new(Some(7));
        sim.connect("localhost", 2000, Duration::from_secs(1)).unwrap();
        sim
    }

    fn camera(frame_rate: u32) -> CameraSpec {
        CameraSpec {
            width: 8,
            height: 4,
            fov: 90.0,
            frame_rate,
            mount: Transform::default(),
        }
    }

    #[test]
    fn pattern_shape() {
        let data = render(4, 2, 0.0, 0.0);
        assert_eq!(data.len(), 4 * 2 * 4);
        assert_eq!(&data[..4], &[0, 0, 128, 255]);
        assert_eq!(&data[4..8], &[1, 0, 128, 255]);
        // scrolled by two pixels
        assert_eq!(render(4, 2, 2.0, 0.0)[0], 2);
        assert_eq!(render(1, 1, 0.0, 1.0)[2], 255);
    }

    #[test]
    fn refused_connection() {
        let mut sim = DummySim::new(None);
        sim.refuse_connections(true);
        let res = sim.connect("localhost", 2000, Duration::from_secs(1));
        assert!(matches!(res, Err(SimError::Connection(_))));
        assert!(matches!(sim.spawn_points(), Err(SimError::NotConnected)));
    }

    #[test]
    fn blueprint_filter() {
        let sim = connected();
        let vehicles = sim.blueprints("vehicle.*").unwrap();
        assert_eq!(vehicles.len(), 5);
        assert!(vehicles.iter().all(|b| b.starts_with("vehicle.")));
        assert_eq!(sim.blueprints("controller.ai.walker").unwrap().len(), 1);
    }

    #[test]
    fn spawn_collision() {
        let mut sim = connected();
        let points = sim.spawn_points().unwrap();
        let first = sim.spawn_actor("vehicle.audi.a2", &points[0], None).unwrap();
        assert!(matches!(
            sim.spawn_actor("vehicle.audi.a2", &points[0], None),
            Err(SimError::SpawnFailed(_))
        ));
        let second = sim.spawn_actor("vehicle.audi.a2", &points[1], None).unwrap();
        assert_ne!(first, second);
        assert_eq!(sim.actor_count(), 2);
    }

    #[test]
    fn forced_spawn_failures() {
        let mut sim = connected();
        let points = sim.spawn_points().unwrap();
        sim.fail_next_spawns(2);
        assert!(sim.spawn_actor("vehicle.audi.a2", &points[0], None).is_err());
        assert!(sim.spawn_actor("vehicle.audi.a2", &points[0], None).is_err());
        assert!(sim.spawn_actor("vehicle.audi.a2", &points[0], None).is_ok());
    }

    #[test]
    fn unknown_blueprint() {
        let mut sim = connected();
        assert!(matches!(
            sim.spawn_actor("vehicle.batmobile", &Transform::default(), None),
            Err(SimError::UnknownBlueprint(_))
        ));
    }

    #[test]
    fn stale_actor() {
        let mut sim = connected();
        let car = sim
            .spawn_actor("vehicle.tesla.model3", &Transform::default(), None)
            .unwrap();
        let control = VehicleControl {
            throttle: 1.0,
            ..Default::default()
        };
        sim.apply_control(car, &control).unwrap();
        assert_eq!(sim.control_of(car), Some(control));

        sim.invalidate(car);
        assert_eq!(
            sim.apply_control(car, &control),
            Err(SimError::StaleActor(car))
        );
        assert_eq!(sim.destroy_actor(car), Err(SimError::StaleActor(car)));
    }

    #[test]
    fn traffic_flags() {
        let mut sim = connected();
        let points = sim.spawn_points().unwrap();
        let car = sim.spawn_actor("vehicle.mini.cooper_s", &points[3], None).unwrap();
        let settings = TrafficSettings {
            leading_vehicle_distance: 4.0,
            synchronous: false,
        };
        assert_eq!(sim.traffic_settings(8000), None);
        sim.configure_traffic(8000, &settings).unwrap();
        assert_eq!(sim.traffic_settings(8000), Some(settings));
        sim.set_autopilot(car, true, 8000).unwrap();

        let at = sim.random_navigation_location().unwrap();
        let walker = sim.spawn_actor("walker.pedestrian.0002", &at, None).unwrap();
        let ai = sim
            .spawn_actor("controller.ai.walker", &Transform::default(), Some(walker))
            .unwrap();
        sim.start_walker(ai, 1.4).unwrap();

        assert_eq!(sim.autopilot_count(), 1);
        assert_eq!(sim.walking_count(), 1);
    }

    #[test]
    fn seeded_locations_repeat() {
        let mut a = connected();
        let mut b = connected();
        assert_eq!(a.random_navigation_location(), b.random_navigation_location());
    }

    #[test]
    fn camera_streams_into_sink() {
        let mut sim = connected();
        let car = sim
            .spawn_actor("vehicle.tesla.model3", &Transform::default(), None)
            .unwrap();
        let sink = FrameSink::new(64);
        sink.set_accepting(true);
        let callback_sink = sink.clone();
        let callback = Box::new(move |img: RawImage| {
            callback_sink.receive(img);
        });
        let cam = sim.attach_camera(&camera(100), car, callback).unwrap();
        assert_eq!(sim.camera_count(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.received() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let frames = sink.drain();
        assert!(frames.len() >= 3);
        assert_eq!((frames[0].width, frames[0].height), (8, 4));

        sim.destroy_actor(cam).unwrap();
        assert_eq!(sim.camera_count(), 0);
        let after = sink.received();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.received(), after);
    }

    #[test]
    fn camera_needs_live_parent() {
        let mut sim = connected();
        let res = sim.attach_camera(&camera(10), 42, Box::new(|_: RawImage| {}));
        assert_eq!(res, Err(SimError::StaleActor(42)));
    }

    #[test]
    fn disconnect_joins_cameras() {
        let mut sim = connected();
        let car = sim
            .spawn_actor("vehicle.tesla.model3", &Transform::default(), None)
            .unwrap();
        sim.attach_camera(&camera(50), car, Box::new(|_: RawImage| {})).unwrap();
        sim.disconnect();
        assert_eq!(sim.camera_count(), 0);
        assert!(!sim.is_connected());
    }
}
