//! Last-writer-wins ordering.

use serde::{Deserialize, Serialize};

/// The `(timestamp, writer)` pair attached to every cell write.
///
/// Ordering is lexicographic: timestamp first, then client id compared
/// bytewise. The derived `Ord` is the comparator every replica and the
/// authority use, so it must not change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Milliseconds since the Unix epoch, as recorded by the writer.
    pub ts: u64,
    /// Id of the writing client.
    pub client_id: String,
}

/// Outcome of comparing an incoming cell write with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LwwDecision {
    /// The incoming write is newer, or the cell has never been written.
    Apply,
    /// The incoming write carries exactly the stored stamp: a replay.
    Duplicate,
    /// The stored write is newer; the incoming value must not be applied.
    Stale,
}

impl Stamp {
    /// Creates a stamp.
    pub fn new(ts: u64, client_id: impl Into<String>) -> Self {
        Self {
            ts,
            client_id: client_id.into(),
        }
    }

    /// Decides whether `self` replaces the stored stamp.
    pub fn decide(&self, stored: Option<&Stamp>) -> LwwDecision {
        match stored {
            None => LwwDecision::Apply,
            Some(stored) => match self.cmp(stored) {
                std::cmp::Ordering::Greater => LwwDecision::Apply,
                std::cmp::Ordering::Equal => LwwDecision::Duplicate,
                std::cmp::Ordering::Less => LwwDecision::Stale,
            },
        }
    }

    /// Returns true if `self` replaces the stored stamp.
    pub fn wins_over(&self, stored: Option<&Stamp>) -> bool {
        self.decide(stored) == LwwDecision::Apply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn later_timestamp_wins() {
        let stored = Stamp::new(100, "z");
        assert!(Stamp::new(101, "a").wins_over(Some(&stored)));
        assert_eq!(Stamp::new(99, "zz").decide(Some(&stored)), LwwDecision::Stale);
    }

    #[test]
    fn tie_broken_by_client_id() {
        let a = Stamp::new(100, "a");
        let b = Stamp::new(100, "b");
        assert!(b.wins_over(Some(&a)));
        assert!(!a.wins_over(Some(&b)));
        assert_eq!(a.decide(Some(&a.clone())), LwwDecision::Duplicate);
    }

    #[test]
    fn empty_cell_accepts_anything() {
        assert!(Stamp::new(0, "").wins_over(None));
    }

    fn stamp() -> impl Strategy<Value = Stamp> {
        (0u64..5, "[a-c]{0,2}").prop_map(|(ts, id)| Stamp::new(ts, id))
    }

    proptest! {
        #[test]
        fn exactly_one_side_wins_unless_equal(a in stamp(), b in stamp()) {
            let ab = a.wins_over(Some(&b));
            let ba = b.wins_over(Some(&a));
            if a == b {
                prop_assert!(!ab && !ba);
            } else {
                prop_assert!(ab ^ ba);
            }
        }

        #[test]
        fn winner_is_independent_of_arrival_order(writes in prop::collection::vec(stamp(), 1..8)) {
            let fold = |order: &[Stamp]| {
                order.iter().fold(None::<Stamp>, |kept, s| {
                    if s.wins_over(kept.as_ref()) { Some(s.clone()) } else { kept }
                })
            };
            let mut reversed = writes.clone();
            reversed.reverse();
            prop_assert_eq!(fold(&writes), fold(&reversed));
        }
    }
}
