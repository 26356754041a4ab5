//! Turns raw key presses and releases into vehicle control.
//!
//! The translator keeps the set of currently held bindings and derives one
//! [`CompositeCommand`] from it whenever asked. Record toggle, camera toggle
//! and quit are edge triggered and come back from [`InputTranslator::handle`]
//! as a [`ControlEvent`]; everything else is level triggered.
//!
//! | Key              | Binding        |
//! |------------------|----------------|
//! | `W` / `Up`       | throttle       |
//! | `S` / `Down`     | brake          |
//! | `A` / `Left`     | steer left     |
//! | `D` / `Right`    | steer right    |
//! | `X`              | reverse gear   |
//! | `Space`          | handbrake      |
//! | `R`              | record toggle  |
//! | `C`              | camera toggle  |
//! | `Esc` / `Q`      | quit           |

use std::collections::HashSet;

use crate::action_log::Command;
use crate::error::RecorderError;
use crate::simulator::VehicleControl;

const FULL_THROTTLE: f32 = 1.0;
const FULL_BRAKE: f32 = 1.0;
const STEER_AMOUNT: f32 = 0.5;

/// A key as the terminal reports it, before any binding is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKey {
    Char(char),
    Up,
    Down,
    Left,
    Right,
    Space,
    Esc,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: RawKey,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn press(key: RawKey) -> Self {
        Self {
            key,
            action: KeyAction::Press,
        }
    }

    pub fn release(key: RawKey) -> Self {
        Self {
            key,
            action: KeyAction::Release,
        }
    }
}

/// Where key events come from: the terminal when recording for real, a
/// script in tests.
pub trait KeySource {
    /// Every key event that arrived since the previous call. Never blocks.
    fn poll_keys(&mut self) -> Result<Vec<KeyEvent>, RecorderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Throttle,
    Brake,
    SteerLeft,
    SteerRight,
    Reverse,
    Handbrake,
    RecordToggle,
    CameraToggle,
    Quit,
}

impl Binding {
    pub fn for_key(key: RawKey) -> Option<Binding> {
        let binding = match key {
            RawKey::Up => Binding::Throttle,
            RawKey::Down => Binding::Brake,
            RawKey::Left => Binding::SteerLeft,
            RawKey::Right => Binding::SteerRight,
            RawKey::Space => Binding::Handbrake,
            RawKey::Esc => Binding::Quit,
            RawKey::Char(c) => match c.to_ascii_lowercase() {
                'w' => Binding::Throttle,
                's' => Binding::Brake,
                'a' => Binding::SteerLeft,
                'd' => Binding::SteerRight,
                'x' => Binding::Reverse,
                ' ' => Binding::Handbrake,
                'r' => Binding::RecordToggle,
                'c' => Binding::CameraToggle,
                'q' => Binding::Quit,
                _ => return None,
            },
            RawKey::Other => return None,
        };
        Some(binding)
    }
}

/// One-shot events that do not drive the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ToggleRecording,
    ToggleCamera,
    Quit,
}

/// The control vector derived from everything held at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompositeCommand {
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
    pub reverse: bool,
    pub hand_brake: bool,
}

impl CompositeCommand {
    /// The vocabulary entries this command is made of, in a fixed order.
    /// Empty means no input.
    pub fn commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.throttle > 0.0 {
            commands.push(Command::Accelerate);
        }
        if self.brake > 0.0 {
            commands.push(Command::Brake);
        }
        if self.steer < 0.0 {
            commands.push(Command::Left);
        }
        if self.steer > 0.0 {
            commands.push(Command::Right);
        }
        if self.reverse {
            commands.push(Command::Reverse);
        }
        if self.hand_brake {
            commands.push(Command::Handbrake);
        }
        commands
    }
}

impl From<CompositeCommand> for VehicleControl {
    fn from(value: CompositeCommand) -> Self {
        VehicleControl {
            throttle: value.throttle,
            steer: value.steer,
            brake: value.brake,
            hand_brake: value.hand_brake,
            reverse: value.reverse,
        }
    }
}

#[derive(Debug)]
pub struct InputTranslator {
    held: HashSet<Binding>,
    // whichever steer key went down last wins while both are held
    last_steer: Option<Binding>,
    reverse_gear: bool,
    max_steer: f32,
}

impl Default for InputTranslator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl InputTranslator {
    pub fn new(max_steer: f32) -> Self {
        Self {
            held: HashSet::new(),
            last_steer: None,
            reverse_gear: false,
            max_steer,
        }
    }

    /// Feed one key event. Repeated presses of a key that is already held
    /// (terminal auto-repeat) change nothing.
    pub fn handle(&mut self, event: KeyEvent) -> Option<ControlEvent> {
        let binding = Binding::for_key(event.key)?;

        match event.action {
            KeyAction::Release => {
                self.held.remove(&binding);
                None
            }
            KeyAction::Press => {
                if !self.held.insert(binding) {
                    return None;
                }
                match binding {
                    Binding::SteerLeft | Binding::SteerRight => {
                        self.last_steer = Some(binding);
                        None
                    }
                    Binding::Reverse => {
                        self.reverse_gear = !self.reverse_gear;
                        None
                    }
                    Binding::RecordToggle => Some(ControlEvent::ToggleRecording),
                    Binding::CameraToggle => Some(ControlEvent::ToggleCamera),
                    Binding::Quit => Some(ControlEvent::Quit),
                    Binding::Throttle | Binding::Brake | Binding::Handbrake => None,
                }
            }
        }
    }

    /// Forget every held key, e.g. when the terminal loses focus. The
    /// reverse gear stays engaged.
    pub fn release_all(&mut self) {
        self.held.clear();
        self.last_steer = None;
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse_gear
    }

    pub fn composite(&self) -> CompositeCommand {
        let hand_brake = self.held.contains(&Binding::Handbrake);
        let (throttle, brake) = if hand_brake {
            (0.0, 0.0)
        } else {
            (
                if self.held.contains(&Binding::Throttle) {
                    FULL_THROTTLE
                } else {
                    0.0
                },
                if self.held.contains(&Binding::Brake) {
                    FULL_BRAKE
                } else {
                    0.0
                },
            )
        };

        let left = self.held.contains(&Binding::SteerLeft);
        let right = self.held.contains(&Binding::SteerRight);
        let amount = STEER_AMOUNT.min(self.max_steer);
        let steer = match (left, right) {
            (true, false) => -amount,
            (false, true) => amount,
            (true, true) if self.last_steer == Some(Binding::SteerLeft) => -amount,
            (true, true) => amount,
            (false, false) => 0.0,
        };

        CompositeCommand {
            throttle,
            brake,
            steer,
            reverse: self.reverse_gear,
            hand_brake,
        }
    }
}
