//! Resume position
//!
//! Where a phase picks up is a pure function of the ordered work list and the
//! checkpoint's last processed key.

use tracing::warn;

/// Slice of a phase's work still to be done
#[derive(Debug, PartialEq, Eq)]
pub struct RemainingWork<'a, T> {
    /// Index of the first remaining item in the full list
    pub start_index: usize,
    pub items: &'a [T],
    /// The checkpoint named a key that is not in the list
    pub restarted: bool,
}

/// Items after `last_processed`, or all of them when it is absent or unknown
///
/// An unknown key restarts the phase from the beginning. Writes are
/// idempotent, so re-processing only costs time.
pub fn remaining_work<'a, T, K>(ordered: &'a [T], last_processed: Option<&str>, key: K) -> RemainingWork<'a, T>
where
    K: Fn(&T) -> &str,
{
    let Some(last) = last_processed else {
        return RemainingWork {
            start_index: 0,
            items: ordered,
            restarted: false,
        };
    };

    match ordered.iter().position(|item| key(item) == last) {
        Some(index) => RemainingWork {
            start_index: index + 1,
            items: &ordered[index + 1..],
            restarted: false,
        },
        None => {
            warn!(last_processed = last, "Checkpoint position not found in source, restarting phase");
            RemainingWork {
                start_index: 0,
                items: ordered,
                restarted: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<String> {
        ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fresh_start_takes_everything() {
        let list = ids();
        let work = remaining_work(&list, None, String::as_str);
        assert_eq!(work.start_index, 0);
        assert_eq!(work.items.len(), 4);
        assert!(!work.restarted);
    }

    #[test]
    fn test_resume_after_last_id() {
        let list = ids();
        let work = remaining_work(&list, Some("b"), String::as_str);
        assert_eq!(work.start_index, 2);
        assert_eq!(work.items, &list[2..]);
    }

    #[test]
    fn test_last_item_leaves_nothing() {
        let list = ids();
        let work = remaining_work(&list, Some("d"), String::as_str);
        assert_eq!(work.start_index, 4);
        assert!(work.items.is_empty());
    }

    #[test]
    fn test_unknown_id_restarts() {
        let list = ids();
        let work = remaining_work(&list, Some("zz"), String::as_str);
        assert_eq!(work.start_index, 0);
        assert_eq!(work.items.len(), 4);
        assert!(work.restarted);
    }
}
