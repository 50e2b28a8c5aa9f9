use std::fmt;
use std::str::FromStr;

/// Terminal classification of one poll cycle.
///
/// Several conditions can hold for the same cycle (a slow fetch that also
/// failed to parse, for example). They are collected in [`OutcomeFlags`] and
/// collapsed into a single value by [`OutcomeFlags::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PollOutcome {
    /// Initial value, no poll has completed yet.
    #[default]
    Open,
    Success,
    /// The schedule decided that updates were published and missed between polls.
    Miss,
    ExecutionTimeWarning,
    Unparsable,
    Unreachable,
    /// Callback or persistence failure.
    Error,
}

impl PollOutcome {
    /// All outcomes, highest priority first.
    pub const BY_PRIORITY: [PollOutcome; 7] = [
        PollOutcome::Error,
        PollOutcome::Unreachable,
        PollOutcome::Unparsable,
        PollOutcome::ExecutionTimeWarning,
        PollOutcome::Miss,
        PollOutcome::Success,
        PollOutcome::Open,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PollOutcome::Open => "open",
            PollOutcome::Success => "success",
            PollOutcome::Miss => "miss",
            PollOutcome::ExecutionTimeWarning => "execution_time_warning",
            PollOutcome::Unparsable => "unparsable",
            PollOutcome::Unreachable => "unreachable",
            PollOutcome::Error => "error",
        }
    }

    /// Whether a previous cycle with this outcome leaves the stored
    /// validators trustworthy enough for a conditional request.
    pub fn allows_conditional_fetch(self) -> bool {
        matches!(
            self,
            PollOutcome::Success | PollOutcome::Miss | PollOutcome::ExecutionTimeWarning
        )
    }

    fn bit(self) -> u8 {
        match self {
            PollOutcome::Open => 1 << 0,
            PollOutcome::Success => 1 << 1,
            PollOutcome::Miss => 1 << 2,
            PollOutcome::ExecutionTimeWarning => 1 << 3,
            PollOutcome::Unparsable => 1 << 4,
            PollOutcome::Unreachable => 1 << 5,
            PollOutcome::Error => 1 << 6,
        }
    }
}

impl fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PollOutcome::BY_PRIORITY
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| format!("unknown poll outcome: {s}"))
    }
}

/// Set of outcome conditions raised during one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeFlags(u8);

impl OutcomeFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outcome: PollOutcome) {
        self.0 |= outcome.bit();
    }

    pub fn contains(&self, outcome: PollOutcome) -> bool {
        self.0 & outcome.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Collapses the set to the highest-priority outcome.
    ///
    /// Priority is fixed (`Error > Unreachable > Unparsable >
    /// ExecutionTimeWarning > Miss > Success > Open`) and does not depend on
    /// the order in which flags were inserted. An empty set resolves to `Open`.
    pub fn resolve(&self) -> PollOutcome {
        PollOutcome::BY_PRIORITY
            .into_iter()
            .find(|o| self.contains(*o))
            .unwrap_or(PollOutcome::Open)
    }
}

impl FromIterator<PollOutcome> for OutcomeFlags {
    fn from_iter<I: IntoIterator<Item = PollOutcome>>(iter: I) -> Self {
        let mut flags = OutcomeFlags::new();
        for outcome in iter {
            flags.insert(outcome);
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_flags_resolve_to_open() {
        assert_eq!(OutcomeFlags::new().resolve(), PollOutcome::Open);
    }

    #[test]
    fn test_slow_and_unparsable_resolves_to_unparsable() {
        let mut flags = OutcomeFlags::new();
        flags.insert(PollOutcome::ExecutionTimeWarning);
        flags.insert(PollOutcome::Unparsable);
        assert_eq!(flags.resolve(), PollOutcome::Unparsable);
    }

    #[test]
    fn test_error_beats_everything() {
        let flags: OutcomeFlags = [
            PollOutcome::Success,
            PollOutcome::Unreachable,
            PollOutcome::Error,
            PollOutcome::Miss,
        ]
        .into_iter()
        .collect();
        assert_eq!(flags.resolve(), PollOutcome::Error);
    }

    #[test]
    fn test_miss_beats_success() {
        let flags: OutcomeFlags = [PollOutcome::Success, PollOutcome::Miss]
            .into_iter()
            .collect();
        assert_eq!(flags.resolve(), PollOutcome::Miss);
    }

    #[test]
    fn test_outcome_text_round_trip() {
        for outcome in PollOutcome::BY_PRIORITY {
            assert_eq!(outcome.as_str().parse::<PollOutcome>(), Ok(outcome));
        }
        assert!("bogus".parse::<PollOutcome>().is_err());
    }

    #[test]
    fn test_conditional_fetch_outcomes() {
        assert!(PollOutcome::Success.allows_conditional_fetch());
        assert!(PollOutcome::Miss.allows_conditional_fetch());
        assert!(PollOutcome::ExecutionTimeWarning.allows_conditional_fetch());
        assert!(!PollOutcome::Open.allows_conditional_fetch());
        assert!(!PollOutcome::Unreachable.allows_conditional_fetch());
        assert!(!PollOutcome::Unparsable.allows_conditional_fetch());
        assert!(!PollOutcome::Error.allows_conditional_fetch());
    }

    fn any_outcome() -> impl Strategy<Value = PollOutcome> {
        (0usize..PollOutcome::BY_PRIORITY.len()).prop_map(|i| PollOutcome::BY_PRIORITY[i])
    }

    proptest! {
        #[test]
        fn prop_resolution_ignores_insertion_order(
            outcomes in proptest::collection::vec(any_outcome(), 0..12)
        ) {
            let forward: OutcomeFlags = outcomes.iter().copied().collect();
            let backward: OutcomeFlags = outcomes.iter().rev().copied().collect();
            prop_assert_eq!(forward.resolve(), backward.resolve());
        }

        #[test]
        fn prop_resolution_picks_highest_priority(
            outcomes in proptest::collection::vec(any_outcome(), 1..12)
        ) {
            let flags: OutcomeFlags = outcomes.iter().copied().collect();
            let expected = PollOutcome::BY_PRIORITY
                .into_iter()
                .find(|o| outcomes.contains(o))
                .unwrap();
            prop_assert_eq!(flags.resolve(), expected);
        }
    }
}
