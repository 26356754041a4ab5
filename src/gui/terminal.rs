use std::io::stdout;

use crossterm::{
    event::{KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags},
    terminal::{
        disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
    ExecutableCommand,
};
use log::{debug, warn};

use crate::gui::error::HudError;

/// Puts the terminal into raw mode for as long as it lives and restores it
/// when dropped, including on early returns and panics that unwind.
pub struct TerminalGuard {
    alternate_screen: bool,
    release_events: bool,
}

impl TerminalGuard {
    /// Enter raw mode, and the alternate screen when a HUD will be drawn.
    /// Key release reporting is switched on where the terminal supports it.
    pub fn enter(alternate_screen: bool) -> Result<Self, HudError> {
        enable_raw_mode()?;
        let mut guard = TerminalGuard {
            alternate_screen: false,
            release_events: false,
        };

        if alternate_screen {
            stdout().execute(EnterAlternateScreen)?;
            guard.alternate_screen = true;
        }

        if supports_keyboard_enhancement().unwrap_or(false) {
            stdout().execute(PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES,
            ))?;
            guard.release_events = true;
            debug!("Terminal reports key releases");
        } else {
            warn!("Terminal cannot report key releases; keys count as held for a short window after each press");
        }

        Ok(guard)
    }

    /// Whether key up events will arrive, or have to be emulated.
    pub fn release_events(&self) -> bool {
        self.release_events
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.release_events {
            let _ = stdout().execute(PopKeyboardEnhancementFlags);
        }
        if self.alternate_screen {
            let _ = stdout().execute(LeaveAlternateScreen);
        }
        let _ = disable_raw_mode();
    }
}
