use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Run a pass now.
    Run,
    /// A trailing pass was scheduled for the given instant.
    Scheduled(Instant),
    /// A trailing pass is already pending and will cover this notification.
    Coalesced,
}

/// Leading and trailing edge throttle for detection passes.
///
/// At most one pass runs per `period`. Notifications inside the window
/// collapse into a single trailing pass at the end of it, so the last change
/// of a burst is never lost.
#[derive(Debug, Clone)]
pub struct Throttle {
    period: Duration,
    last_run: Option<Instant>,
    trailing: Option<Instant>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_run: None,
            trailing: None,
        }
    }

    pub fn notify(&mut self, now: Instant) -> ThrottleDecision {
        if self.trailing.is_some() {
            return ThrottleDecision::Coalesced;
        }
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.period => {
                let at = last + self.period;
                self.trailing = Some(at);
                ThrottleDecision::Scheduled(at)
            }
            _ => {
                self.last_run = Some(now);
                ThrottleDecision::Run
            }
        }
    }

    /// Instant of the pending trailing pass.
    pub fn deadline(&self) -> Option<Instant> {
        self.trailing
    }

    /// Consumes the trailing pass if it is due. Returns true when the caller
    /// should run it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.trailing {
            Some(at) if at <= now => {
                self.trailing = None;
                self.last_run = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Takes the pending trailing pass regardless of its deadline.
    pub fn flush(&mut self, now: Instant) -> bool {
        if self.trailing.take().is_some() {
            self.last_run = Some(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(33);

    #[test]
    fn first_notification_runs_immediately() {
        let mut throttle = Throttle::new(PERIOD);
        let now = Instant::now();
        assert_eq!(throttle.notify(now), ThrottleDecision::Run);
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn notifications_inside_window_coalesce_into_one_trailing_pass() {
        let mut throttle = Throttle::new(PERIOD);
        let start = Instant::now();
        let mut runs = 0;
        for i in 0..50u64 {
            let now = start + Duration::from_micros(i * 100);
            match throttle.notify(now) {
                ThrottleDecision::Run => runs += 1,
                ThrottleDecision::Scheduled(at) => assert_eq!(at, start + PERIOD),
                ThrottleDecision::Coalesced => {}
            }
        }
        assert_eq!(runs, 1);
        assert!(!throttle.fire(start + Duration::from_millis(10)));
        assert!(throttle.fire(start + PERIOD));
        runs += 1;
        assert!(!throttle.fire(start + PERIOD * 2));
        assert_eq!(runs, 2);
    }

    #[test]
    fn notification_after_window_runs_on_leading_edge() {
        let mut throttle = Throttle::new(PERIOD);
        let start = Instant::now();
        throttle.notify(start);
        assert_eq!(throttle.notify(start + PERIOD), ThrottleDecision::Run);
    }

    #[test]
    fn flush_takes_pending_pass_early() {
        let mut throttle = Throttle::new(PERIOD);
        let start = Instant::now();
        throttle.notify(start);
        throttle.notify(start + Duration::from_millis(1));
        assert!(throttle.flush(start + Duration::from_millis(2)));
        assert!(!throttle.flush(start + Duration::from_millis(3)));
        assert_eq!(throttle.deadline(), None);
    }
}
