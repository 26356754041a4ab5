//! The slice of the driving simulator's client API the recorder consumes.
//!
//! Everything the recorder asks of the simulator goes through a
//! [`SimulatorClient`] that the caller owns and passes by reference, so there
//! is no global connection. [`DummySim`](crate::dummy_sim::DummySim) is an
//! in-process implementation.

use std::{borrow::Cow, fmt, time::Duration};

use crate::config::CameraMount;

pub type ActorId = u32;

/// Throttle, brake and steer as the simulator takes them each tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleControl {
    /// 0.0 to 1.0
    pub throttle: f32,
    /// -1.0 (full left) to 1.0 (full right)
    pub steer: f32,
    /// 0.0 to 1.0
    pub brake: f32,
    pub hand_brake: bool,
    pub reverse: bool,
}

/// A location in metres and a rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl From<CameraMount> for Transform {
    fn from(m: CameraMount) -> Self {
        Transform {
            x: m.x,
            y: m.y,
            z: m.z,
            pitch: m.pitch,
            yaw: m.yaw,
            roll: m.roll,
        }
    }
}

/// Everything needed to attach an RGB camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSpec {
    pub width: u32,
    pub height: u32,
    pub fov: f32,
    /// Frames per second the sensor should deliver.
    pub frame_rate: u32,
    pub mount: Transform,
}

/// Global behaviour of a traffic manager, shared by every vehicle it
/// drives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficSettings {
    /// Gap in metres autopilot vehicles keep to the vehicle ahead.
    pub leading_vehicle_distance: f32,
    /// Step the traffic manager in lockstep with a synchronous world.
    pub synchronous: bool,
}

/// An image exactly as the simulator hands it over: BGRA, 4 bytes per
/// pixel, row major.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// The simulator's own frame counter.
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Called on the simulator's sensor thread for every image.
pub type ImageCallback = Box<dyn FnMut(RawImage) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// The server could not be reached or is not ready.
    Connection(String),
    /// A call took longer than the client timeout.
    Timeout,
    /// A call was made before `connect` or after `disconnect`.
    NotConnected,
    /// The server refused to spawn; usually a collision at the spawn point.
    SpawnFailed(String),
    /// The actor no longer exists on the server.
    StaleActor(ActorId),
    UnknownBlueprint(String),
}

impl SimError {
    /// Whether the error concerns one actor's lifecycle and can be fixed by
    /// spawning again.
    pub fn is_actor_error(&self) -> bool {
        matches!(self, SimError::SpawnFailed(_) | SimError::StaleActor(_))
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            SimError::Connection(why) => Cow::from(format!("cannot reach simulator: {}", why)),
            SimError::Timeout => Cow::from("simulator timed out"),
            SimError::NotConnected => Cow::from("not connected"),
            SimError::SpawnFailed(why) => Cow::from(format!("spawn failed: {}", why)),
            SimError::StaleActor(id) => Cow::from(format!("actor {} no longer exists", id)),
            SimError::UnknownBlueprint(name) => Cow::from(format!("unknown blueprint {}", name)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for SimError {}

/// `SimulatorClient`
///
/// The client side of a running simulator. Connect once, spawn actors,
/// attach a camera, then apply control every tick.
pub trait SimulatorClient {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), SimError>;

    /// Drops the connection. Actors are left to the caller to clean up
    /// first.
    fn disconnect(&mut self);

    /// Names of every blueprint matching `pattern`, where a trailing `*`
    /// matches any suffix (`vehicle.*`).
    fn blueprints(&self, pattern: &str) -> Result<Vec<String>, SimError>;

    /// The map's recommended vehicle spawn points.
    fn spawn_points(&self) -> Result<Vec<Transform>, SimError>;

    /// A random point on the pedestrian navigation mesh.
    fn random_navigation_location(&mut self) -> Option<Transform>;

    /// Spawn an actor, optionally attached to a parent.
    fn spawn_actor(
        &mut self,
        blueprint: &str,
        at: &Transform,
        parent: Option<ActorId>,
    ) -> Result<ActorId, SimError>;

    fn destroy_actor(&mut self, actor: ActorId) -> Result<(), SimError>;

    /// Configure the traffic manager listening on `tm_port`, starting it if
    /// needed.
    fn configure_traffic(&mut self, tm_port: u16, settings: &TrafficSettings)
        -> Result<(), SimError>;

    /// Hand a vehicle over to the traffic manager listening on `tm_port`.
    fn set_autopilot(&mut self, vehicle: ActorId, enabled: bool, tm_port: u16)
        -> Result<(), SimError>;

    /// Start an AI walker controller heading somewhere random.
    fn start_walker(&mut self, controller: ActorId, max_speed: f32) -> Result<(), SimError>;

    /// Attach an RGB camera to `parent`. `callback` runs on the simulator's
    /// sensor thread for every image and must return quickly.
    fn attach_camera(
        &mut self,
        spec: &CameraSpec,
        parent: ActorId,
        callback: ImageCallback,
    ) -> Result<ActorId, SimError>;

    fn set_transform(&mut self, actor: ActorId, transform: &Transform) -> Result<(), SimError>;

    fn apply_control(&mut self, vehicle: ActorId, control: &VehicleControl)
        -> Result<(), SimError>;
}

/// Whether `name` matches a blueprint `pattern` with an optional trailing
/// `*`.
pub fn blueprint_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}
