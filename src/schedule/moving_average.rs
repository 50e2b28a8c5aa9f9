use super::{ActivityPattern, ScheduleController, WindowKind, WindowStats};
use crate::storage::Feed;

const ZOMBIE_AGE_SECS: i64 = 90 * 24 * 3600;
const SPORADIC_GAP_SECS: i64 = 24 * 3600;

/// Default schedule: interval follows the mean gap between published items.
///
/// Failures back off by half the current interval, 304 responses by a
/// quarter. Every value is clamped to `[min_interval, max_interval]` minutes.
#[derive(Debug, Clone, Copy)]
pub struct MovingAverageSchedule {
    pub min_interval: i64,
    pub max_interval: i64,
}

impl MovingAverageSchedule {
    pub fn new(min_interval: i64, max_interval: i64) -> Self {
        let min_interval = min_interval.max(1);
        Self {
            min_interval,
            max_interval: max_interval.max(min_interval),
        }
    }

    fn clamp(&self, minutes: i64) -> i64 {
        minutes.clamp(self.min_interval, self.max_interval)
    }
}

impl Default for MovingAverageSchedule {
    fn default() -> Self {
        Self::new(5, 24 * 60)
    }
}

impl ScheduleController for MovingAverageSchedule {
    fn advance(&self, feed: &mut Feed, stats: &WindowStats, force_reset: bool) -> bool {
        let current = feed.check_interval.max(1);

        match stats.kind {
            WindowKind::Failed => {
                feed.check_interval = self.clamp(current + current / 2);
                return false;
            }
            WindowKind::Unmodified => {
                feed.check_interval = self.clamp(current + current / 4);
                return false;
            }
            WindowKind::Fetched => {}
        }

        let (Some(newest), Some(oldest)) = (stats.newest(), stats.oldest()) else {
            feed.activity = ActivityPattern::Dead;
            feed.check_interval = self.max_interval;
            return false;
        };

        if stats.poll_time - newest > ZOMBIE_AGE_SECS {
            feed.activity = ActivityPattern::Zombie;
            feed.check_interval = self.max_interval;
            return false;
        }

        let n = stats.timestamps.len() as i64;
        let mean_gap = if n >= 2 {
            (newest - oldest) / (n - 1)
        } else {
            stats.poll_time - newest
        };

        feed.activity = if mean_gap > SPORADIC_GAP_SECS {
            ActivityPattern::Sporadic
        } else {
            ActivityPattern::Constant
        };

        let target = self.clamp(mean_gap / 60);
        feed.check_interval = if force_reset {
            target
        } else {
            self.clamp((current + target) / 2)
        };

        // Every item is new and even the oldest was published after the
        // previous poll: the window overflowed between polls.
        match feed.last_poll {
            Some(previous) if !force_reset => {
                stats.window_size > 0 && stats.new_items >= stats.window_size && oldest > previous
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Feed;

    fn feed(interval: i64, last_poll: Option<i64>) -> Feed {
        let mut feed = Feed::new(1, "https://example.com/feed.xml");
        feed.check_interval = interval;
        feed.last_poll = last_poll;
        feed
    }

    #[test]
    fn test_failure_backs_off_and_stays_positive() {
        let schedule = MovingAverageSchedule::default();
        let mut f = feed(60, Some(0));
        assert!(!schedule.advance(&mut f, &WindowStats::failed(100), false));
        assert_eq!(f.check_interval, 90);

        let mut f = feed(1, None);
        schedule.advance(&mut f, &WindowStats::failed(100), false);
        assert!(f.check_interval >= schedule.min_interval);
    }

    #[test]
    fn test_backoff_is_capped() {
        let schedule = MovingAverageSchedule::new(5, 100);
        let mut f = feed(90, None);
        schedule.advance(&mut f, &WindowStats::failed(0), false);
        assert_eq!(f.check_interval, 100);
    }

    #[test]
    fn test_empty_window_is_dead() {
        let schedule = MovingAverageSchedule::default();
        let mut f = feed(60, None);
        schedule.advance(&mut f, &WindowStats::fetched(0, vec![], 0), true);
        assert_eq!(f.activity, ActivityPattern::Dead);
        assert_eq!(f.check_interval, schedule.max_interval);
    }

    #[test]
    fn test_interval_follows_publish_gap_on_reset() {
        let schedule = MovingAverageSchedule::default();
        let now = 1_000_000;
        // One item every two hours
        let ts = vec![now - 100, now - 100 - 7200, now - 100 - 14400];
        let mut f = feed(5, None);
        schedule.advance(&mut f, &WindowStats::fetched(now, ts, 3), true);
        assert_eq!(f.check_interval, 120);
        assert_eq!(f.activity, ActivityPattern::Constant);
    }

    #[test]
    fn test_interval_is_smoothed_without_reset() {
        let schedule = MovingAverageSchedule::default();
        let now = 1_000_000;
        let ts = vec![now - 10, now - 10 - 7200];
        let mut f = feed(60, Some(now - 3600));
        schedule.advance(&mut f, &WindowStats::fetched(now, ts, 0), false);
        assert_eq!(f.check_interval, 90);
    }

    #[test]
    fn test_miss_when_whole_window_is_newer_than_previous_poll() {
        let schedule = MovingAverageSchedule::default();
        let now = 1_000_000;
        let previous = now - 3600;
        let ts = vec![now - 60, now - 120, now - 180];

        let mut f = feed(60, Some(previous));
        assert!(schedule.advance(&mut f, &WindowStats::fetched(now, ts.clone(), 3), false));

        // Same window but one item was already known: no miss
        let mut f = feed(60, Some(previous));
        assert!(!schedule.advance(&mut f, &WindowStats::fetched(now, ts.clone(), 2), false));

        // Cold start never reports a miss
        let mut f = feed(60, Some(previous));
        assert!(!schedule.advance(&mut f, &WindowStats::fetched(now, ts, 3), true));
    }

    #[test]
    fn test_old_items_mark_zombie() {
        let schedule = MovingAverageSchedule::default();
        let now = 400 * 24 * 3600;
        let mut f = feed(60, None);
        schedule.advance(&mut f, &WindowStats::fetched(now, vec![0, 10], 2), true);
        assert_eq!(f.activity, ActivityPattern::Zombie);
    }

    #[test]
    fn test_sporadic_feed() {
        let schedule = MovingAverageSchedule::default();
        let now = 10 * 24 * 3600;
        let ts = vec![now - 10, now - 10 - 3 * 24 * 3600];
        let mut f = feed(60, None);
        schedule.advance(&mut f, &WindowStats::fetched(now, ts, 2), true);
        assert_eq!(f.activity, ActivityPattern::Sporadic);
        assert_eq!(f.check_interval, schedule.max_interval);
    }
}
