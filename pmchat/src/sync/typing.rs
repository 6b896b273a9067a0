//! Typing indicators.

use std::time::Duration;
use tokio::time::Instant;

/// Counterpart "is typing" flag with automatic expiry.
///
/// Every notice re-arms the deadline and bumps a generation; an expiry
/// timer carrying an older generation is ignored.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    timeout: Duration,
    deadline: Option<Instant>,
    generation: u64,
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
            generation: 0,
        }
    }

    /// Record a typing notice. Returns the generation the expiry timer must carry.
    pub fn on_typing(&mut self, now: Instant) -> u64 {
        self.generation += 1;
        self.deadline = Some(now + self.timeout);
        self.generation
    }

    /// Record an explicit stop.
    pub fn on_stopped(&mut self) {
        self.generation += 1;
        self.deadline = None;
    }

    /// Expiry timer fired. Returns true if the flag was cleared.
    pub fn expire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.deadline.is_none() {
            return false;
        }
        self.deadline = None;
        true
    }

    /// Whether the counterpart counts as typing at `now`.
    pub fn is_typing(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    /// The wait before expiry.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reset(&mut self) {
        self.on_stopped();
    }
}

/// Debounce for the outbound `userStoppedTyping` signal.
#[derive(Debug, Clone, Default)]
pub struct StopTypingDebounce {
    generation: u64,
    armed: bool,
}

impl StopTypingDebounce {
    /// A keystroke happened. Returns the generation the stop timer must carry.
    pub fn keystroke(&mut self) -> u64 {
        self.generation += 1;
        self.armed = true;
        self.generation
    }

    /// Stop timer fired. Returns true if the stop signal should go out.
    pub fn fire(&mut self, generation: u64) -> bool {
        if !self.armed || generation != self.generation {
            return false;
        }
        self.armed = false;
        true
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typing_expires_at_boundary() {
        let start = Instant::now();
        let mut indicator = TypingIndicator::new(Duration::from_millis(3000));
        indicator.on_typing(start);

        assert!(indicator.is_typing(start));
        assert!(indicator.is_typing(start + Duration::from_millis(2999)));
        assert!(!indicator.is_typing(start + Duration::from_millis(3000)));
    }

    #[test]
    fn test_repeated_notice_extends() {
        let start = Instant::now();
        let mut indicator = TypingIndicator::new(Duration::from_millis(3000));
        let first = indicator.on_typing(start);
        let second = indicator.on_typing(start + Duration::from_millis(2000));

        assert!(!indicator.expire(first));
        assert!(indicator.is_typing(start + Duration::from_millis(4000)));
        assert!(indicator.expire(second));
        assert!(!indicator.is_typing(start + Duration::from_millis(4000)));
    }

    #[test]
    fn test_stop_clears() {
        let start = Instant::now();
        let mut indicator = TypingIndicator::new(Duration::from_millis(3000));
        let generation = indicator.on_typing(start);
        indicator.on_stopped();
        assert!(!indicator.is_typing(start));
        assert!(!indicator.expire(generation));
    }

    #[test]
    fn test_stop_typing_debounce() {
        let mut debounce = StopTypingDebounce::default();
        let first = debounce.keystroke();
        let second = debounce.keystroke();

        assert!(!debounce.fire(first));
        assert!(debounce.fire(second));
        assert!(!debounce.fire(second));

        let third = debounce.keystroke();
        debounce.cancel();
        assert!(!debounce.fire(third));
    }
}
