use std::time::{Duration, Instant};

/// Scanners type much faster than people; 50ms between keys is a safe split.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(50);

/// Shortest code accepted as a scan (EAN-8 and up, with margin for short internal codes)
pub const DEFAULT_MIN_LENGTH: usize = 6;

/// A key event as seen by the keystroke buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
}

/// Accumulates keystrokes and recognizes the ones that came from a scanner.
///
/// Characters that arrive within `max_interval` of each other build up a
/// candidate code; a slower keystroke starts over. An Enter that closes a fast
/// run of at least `min_length` characters yields the code.
#[derive(Debug, Clone)]
pub struct BarcodeBuffer {
    max_interval: Duration,
    min_length: usize,
    buffer: String,
    last_key_at: Option<Instant>,
}

impl Default for BarcodeBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTERVAL, DEFAULT_MIN_LENGTH)
    }
}

impl BarcodeBuffer {
    pub fn new(max_interval: Duration, min_length: usize) -> Self {
        Self {
            max_interval,
            min_length,
            buffer: String::new(),
            last_key_at: None,
        }
    }

    /// Feed one key event. Returns the scanned code when `key` completes one.
    pub fn push(&mut self, key: Key, at: Instant) -> Option<String> {
        let in_cadence = self
            .last_key_at
            .map(|last| at.saturating_duration_since(last) <= self.max_interval)
            .unwrap_or(false);

        match key {
            Key::Char(c) if c.is_control() => None,
            Key::Char(c) => {
                if !in_cadence {
                    self.buffer.clear();
                }
                self.buffer.push(c);
                self.last_key_at = Some(at);
                None
            }
            Key::Enter => {
                let complete = in_cadence && self.buffer.chars().count() >= self.min_length;
                let code = std::mem::take(&mut self.buffer);
                self.last_key_at = None;
                complete.then_some(code)
            }
        }
    }

    /// Characters collected so far in the current fast run
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_key_at = None;
    }
}
