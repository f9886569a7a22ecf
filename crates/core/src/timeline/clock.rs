use std::time::{Duration, Instant};

/// Monotonic chronometer that can be paused. Paused intervals are excluded
/// from [`PlaybackClock::elapsed`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackClock {
    anchor: Option<Instant>,
    accumulated: Duration,
}

impl PlaybackClock {
    /// A clock that starts counting immediately.
    pub fn start() -> Self {
        Self {
            anchor: Some(Instant::now()),
            accumulated: Duration::ZERO,
        }
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.anchor {
            Some(anchor) => self.accumulated + anchor.elapsed(),
            None => self.accumulated,
        }
    }

    pub fn pause(&mut self) {
        if let Some(anchor) = self.anchor.take() {
            self.accumulated += anchor.elapsed();
        }
    }

    /// Continues counting from the value frozen by the last pause.
    pub fn resume(&mut self) {
        if self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.accumulated = Duration::ZERO;
    }
}

/// Formats seconds as `HH:MM:SS.mmm`.
pub fn format_hms(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0) as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let secs = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn formats_hours_minutes_seconds_and_millis() {
        assert_eq!(format_hms(0.0), "00:00:00.000");
        assert_eq!(format_hms(3723.25), "01:02:03.250");
        assert_eq!(format_hms(-4.0), "00:00:00.000");
    }

    #[test]
    fn paused_time_is_not_counted() {
        let mut clock = PlaybackClock::start();
        thread::sleep(Duration::from_millis(20));
        clock.pause();
        let frozen = clock.elapsed();
        assert!(frozen >= Duration::from_millis(20));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(clock.elapsed(), frozen);

        clock.resume();
        thread::sleep(Duration::from_millis(10));
        let resumed = clock.elapsed();
        assert!(resumed >= frozen + Duration::from_millis(10));
        assert!(resumed < frozen + Duration::from_millis(50));
    }

    #[test]
    fn reset_stops_and_clears() {
        let mut clock = PlaybackClock::start();
        clock.reset();
        assert!(!clock.is_running());
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
