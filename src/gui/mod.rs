mod error;
mod hud;
mod keyboard;
mod terminal;

pub use error::HudError;
pub use hud::{Hud, HudStatus};
pub use keyboard::{map_key_code, CrosstermKeys, HoldEmulator};
pub use terminal::TerminalGuard;
