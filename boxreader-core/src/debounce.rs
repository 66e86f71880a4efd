use std::time::{Duration, Instant};

/// Trailing-edge debouncer driven by a generation counter.
///
/// Every trigger bumps the generation and pushes the deadline out; only the
/// generation that is still current when the deadline passes fires.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    generation: u64,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            generation: 0,
            deadline: None,
        }
    }

    pub fn trigger(&mut self, now: Instant) -> u64 {
        self.generation += 1;
        self.deadline = Some(now + self.quiet);
        self.generation
    }

    /// Fires at most once per burst, returning the generation that won.
    pub fn due(&mut self, now: Instant) -> Option<u64> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(self.generation)
            }
            _ => None,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        self.deadline = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_last_trigger_of_a_burst_fires() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        let first = debouncer.trigger(start);
        let second = debouncer.trigger(start + Duration::from_millis(100));
        assert!(!debouncer.is_current(first));
        assert_eq!(debouncer.due(start + Duration::from_millis(350)), None);
        assert_eq!(
            debouncer.due(start + Duration::from_millis(400)),
            Some(second)
        );
        assert_eq!(debouncer.due(start + Duration::from_millis(900)), None);
    }

    #[test]
    fn cancel_drops_the_pending_invocation() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(120));
        let generation = debouncer.trigger(start);
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        assert!(!debouncer.is_current(generation));
        assert_eq!(debouncer.due(start + Duration::from_secs(1)), None);
    }
}
