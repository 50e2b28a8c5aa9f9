//! Adaptive poll scheduling.
//!
//! The poll task only talks to [`ScheduleController`]. It stores the
//! resulting [`ActivityPattern`] on the feed without ever inspecting it.

mod moving_average;

use std::fmt;
use std::str::FromStr;

use crate::storage::Feed;

pub use moving_average::MovingAverageSchedule;

/// Coarse description of how a feed publishes, owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivityPattern {
    #[default]
    Unknown,
    /// Window is empty.
    Dead,
    /// Items exist but nothing has been published for a long time.
    Zombie,
    /// Publishes less than about once a day.
    Sporadic,
    /// Publishes regularly.
    Constant,
}

impl ActivityPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityPattern::Unknown => "unknown",
            ActivityPattern::Dead => "dead",
            ActivityPattern::Zombie => "zombie",
            ActivityPattern::Sporadic => "sporadic",
            ActivityPattern::Constant => "constant",
        }
    }
}

impl fmt::Display for ActivityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(ActivityPattern::Unknown),
            "dead" => Ok(ActivityPattern::Dead),
            "zombie" => Ok(ActivityPattern::Zombie),
            "sporadic" => Ok(ActivityPattern::Sporadic),
            "constant" => Ok(ActivityPattern::Constant),
            other => Err(format!("unknown activity pattern: {other}")),
        }
    }
}

/// What the current poll observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Transport or HTTP failure, no window available.
    Failed,
    /// Server answered 304.
    Unmodified,
    /// A window was fetched and parsed.
    Fetched,
}

/// Summary of one poll window handed to the schedule controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStats {
    pub kind: WindowKind,
    /// Unix seconds at which the poll started.
    pub poll_time: i64,
    /// Corrected publish timestamps, newest first.
    pub timestamps: Vec<i64>,
    /// Distinct items in the window.
    pub window_size: usize,
    pub new_items: usize,
}

impl WindowStats {
    pub fn failed(poll_time: i64) -> Self {
        Self::empty(WindowKind::Failed, poll_time)
    }

    pub fn unmodified(poll_time: i64) -> Self {
        Self::empty(WindowKind::Unmodified, poll_time)
    }

    /// `timestamps` holds one entry per distinct item of the window.
    pub fn fetched(poll_time: i64, mut timestamps: Vec<i64>, new_items: usize) -> Self {
        timestamps.sort_unstable_by(|a, b| b.cmp(a));
        Self {
            kind: WindowKind::Fetched,
            poll_time,
            window_size: timestamps.len(),
            timestamps,
            new_items,
        }
    }

    fn empty(kind: WindowKind, poll_time: i64) -> Self {
        Self {
            kind,
            poll_time,
            timestamps: Vec::new(),
            window_size: 0,
            new_items: 0,
        }
    }

    pub fn newest(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn oldest(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }
}

/// Predicts when a feed should next be polled.
///
/// Implementations mutate `feed.check_interval` (minutes, always positive)
/// and `feed.activity`. `feed.last_poll` still holds the previous poll time
/// during the call. The return value reports whether the window indicates
/// that updates were published and missed between polls; recording the miss
/// is up to the caller.
pub trait ScheduleController: Send + Sync {
    fn advance(&self, feed: &mut Feed, stats: &WindowStats, force_reset: bool) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetched_stats_sorted_newest_first() {
        let stats = WindowStats::fetched(1_000, vec![10, 30, 20], 1);
        assert_eq!(stats.timestamps, vec![30, 20, 10]);
        assert_eq!(stats.newest(), Some(30));
        assert_eq!(stats.oldest(), Some(10));
        assert_eq!(stats.window_size, 3);
    }

    #[test]
    fn test_activity_text_round_trip() {
        for p in [
            ActivityPattern::Unknown,
            ActivityPattern::Dead,
            ActivityPattern::Zombie,
            ActivityPattern::Sporadic,
            ActivityPattern::Constant,
        ] {
            assert_eq!(p.as_str().parse::<ActivityPattern>(), Ok(p));
        }
    }
}
