use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

use crate::error::RecorderError;
use crate::gui::error::HudError;
use crate::input::{KeyEvent, KeySource, RawKey};

pub fn map_key_code(code: KeyCode) -> RawKey {
    match code {
        KeyCode::Up => RawKey::Up,
        KeyCode::Down => RawKey::Down,
        KeyCode::Left => RawKey::Left,
        KeyCode::Right => RawKey::Right,
        KeyCode::Esc => RawKey::Esc,
        KeyCode::Char(' ') => RawKey::Space,
        KeyCode::Char(c) => RawKey::Char(c.to_ascii_lowercase()),
        _ => RawKey::Other,
    }
}

/// Synthesises key releases for terminals that only report presses.
///
/// Each press (auto-repeat included) keeps the key held until `hold` has
/// passed without another press for it.
#[derive(Debug)]
pub struct HoldEmulator {
    hold: Duration,
    last_seen: HashMap<RawKey, Instant>,
}

impl HoldEmulator {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            last_seen: HashMap::new(),
        }
    }

    /// Registers a press at `now`. Only the first press of a hold is passed
    /// on; repeats just extend it.
    pub fn press(&mut self, key: RawKey, now: Instant) -> Option<KeyEvent> {
        match self.last_seen.insert(key, now) {
            Some(_) => None,
            None => Some(KeyEvent::press(key)),
        }
    }

    /// Releases for every key whose hold ran out by `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<KeyEvent> {
        let hold = self.hold;
        let mut released = Vec::new();
        self.last_seen.retain(|&key, &mut seen| {
            let keep = now.saturating_duration_since(seen) < hold;
            if !keep {
                released.push(KeyEvent::release(key));
            }
            keep
        });
        released
    }

    /// Releases for everything currently held.
    pub fn release_all(&mut self) -> Vec<KeyEvent> {
        self.last_seen
            .drain()
            .map(|(key, _)| KeyEvent::release(key))
            .collect()
    }
}

/// Reads keys from the terminal without blocking. Requires raw mode, see
/// [`TerminalGuard`](crate::gui::TerminalGuard).
pub struct CrosstermKeys {
    // None when the terminal reports releases itself
    emulator: Option<HoldEmulator>,
    held: Vec<RawKey>,
}

impl CrosstermKeys {
    pub fn new(release_events: bool, hold: Duration) -> Self {
        Self {
            emulator: (!release_events).then(|| HoldEmulator::new(hold)),
            held: Vec::new(),
        }
    }

    fn read_pending(&mut self) -> Result<Vec<KeyEvent>, HudError> {
        let now = Instant::now();
        let mut events = Vec::new();

        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) => {
                    // raw mode swallows SIGINT, so Ctrl-C quits like Esc
                    let raw = if key.modifiers.contains(KeyModifiers::CONTROL)
                        && key.code == KeyCode::Char('c')
                    {
                        RawKey::Esc
                    } else {
                        map_key_code(key.code)
                    };

                    match (&mut self.emulator, key.kind) {
                        (Some(emulator), _) => events.extend(emulator.press(raw, now)),
                        (None, KeyEventKind::Press) => {
                            self.held.push(raw);
                            events.push(KeyEvent::press(raw));
                        }
                        (None, KeyEventKind::Repeat) => {}
                        (None, KeyEventKind::Release) => {
                            self.held.retain(|&k| k != raw);
                            events.push(KeyEvent::release(raw));
                        }
                    }
                }
                Event::FocusLost => {
                    if let Some(emulator) = &mut self.emulator {
                        events.extend(emulator.release_all());
                    }
                    events.extend(self.held.drain(..).map(KeyEvent::release));
                }
                _ => {}
            }
        }

        if let Some(emulator) = &mut self.emulator {
            events.extend(emulator.expire(now));
        }
        Ok(events)
    }
}

impl KeySource for CrosstermKeys {
    fn poll_keys(&mut self) -> Result<Vec<KeyEvent>, RecorderError> {
        Ok(self.read_pending()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(150);

    #[test]
    fn key_codes() {
        assert_eq!(map_key_code(KeyCode::Char('W')), RawKey::Char('w'));
        assert_eq!(map_key_code(KeyCode::Char(' ')), RawKey::Space);
        assert_eq!(map_key_code(KeyCode::Left), RawKey::Left);
        assert_eq!(map_key_code(KeyCode::Esc), RawKey::Esc);
        assert_eq!(map_key_code(KeyCode::F(5)), RawKey::Other);
    }

    #[test]
    fn hold_window() {
        let t0 = Instant::now();
        let mut e = HoldEmulator::new(HOLD);
        let w = RawKey::Char('w');

        assert_eq!(e.press(w, t0), Some(KeyEvent::press(w)));
        assert!(e.expire(t0 + Duration::from_millis(100)).is_empty());
        // auto-repeat extends the hold
        assert_eq!(e.press(w, t0 + Duration::from_millis(120)), None);
        assert!(e.expire(t0 + Duration::from_millis(200)).is_empty());
        assert_eq!(
            e.expire(t0 + Duration::from_millis(270)),
            vec![KeyEvent::release(w)]
        );
        assert!(e.expire(t0 + Duration::from_secs(1)).is_empty());
        // a new press after expiry starts a new hold
        assert_eq!(
            e.press(w, t0 + Duration::from_secs(1)),
            Some(KeyEvent::press(w))
        );
    }

    #[test]
    fn independent_keys() {
        let t0 = Instant::now();
        let mut e = HoldEmulator::new(HOLD);
        e.press(RawKey::Char('w'), t0);
        e.press(RawKey::Char('d'), t0 + Duration::from_millis(100));
        assert_eq!(
            e.expire(t0 + Duration::from_millis(160)),
            vec![KeyEvent::release(RawKey::Char('w'))]
        );
        assert_eq!(e.release_all(), vec![KeyEvent::release(RawKey::Char('d'))]);
    }
}
