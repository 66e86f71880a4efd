use std::collections::VecDeque;
use std::time::Duration;

/// Interval at which one queued character is revealed.
pub const PACE_INTERVAL: Duration = Duration::from_millis(16);

/// Reveals streamed text one character per tick, independent of how the
/// network batched it.
#[derive(Debug, Default)]
pub struct StreamPacer {
    queue: VecDeque<char>,
    displayed: String,
    active: bool,
}

impl StreamPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.queue.clear();
        self.displayed.clear();
        self.active = true;
    }

    /// Drops anything still queued.
    pub fn stop(&mut self) {
        self.active = false;
        self.queue.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn push(&mut self, text: &str) {
        if self.active {
            self.queue.extend(text.chars());
        }
    }

    /// Moves one character to the displayed text. Returns whether anything moved.
    pub fn tick(&mut self) -> bool {
        if !self.active {
            return false;
        }
        match self.queue.pop_front() {
            Some(ch) => {
                self.displayed.push(ch);
                true
            }
            None => false,
        }
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn backlog(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_are_revealed_one_char_per_tick() {
        let mut pacer = StreamPacer::new();
        pacer.start();
        pacer.push("héllo");
        assert_eq!(pacer.backlog(), 5);
        assert!(pacer.tick());
        assert!(pacer.tick());
        assert_eq!(pacer.displayed(), "hé");
        for _ in 0..3 {
            pacer.tick();
        }
        assert_eq!(pacer.displayed(), "héllo");
        assert!(!pacer.tick());
    }

    #[test]
    fn stopped_pacer_ignores_input() {
        let mut pacer = StreamPacer::new();
        pacer.start();
        pacer.push("ab");
        pacer.stop();
        assert!(!pacer.tick());
        pacer.push("cd");
        assert_eq!(pacer.backlog(), 0);
        pacer.start();
        assert_eq!(pacer.displayed(), "");
    }
}
