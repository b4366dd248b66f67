#![forbid(unsafe_code)]

//! Minimal-edit sequence reconciliation.
//!
//! [`difference`] computes an ordered edit script converting a *current*
//! sequence into a *desired* one. Role synchronizers turn the script into
//! child-mapper creation, destruction, and relocation, so the script must
//! maximize reuse: an element present in both sequences is expressed as
//! `Remove` + `Add` of the same item (a relocation) rather than being
//! silently dropped and recreated at a new position.
//!
//! # Algorithm
//!
//! A longest-common-subsequence dynamic program over value equality marks
//! the elements to keep. The script then emits:
//!
//! 1. `Remove` steps for unmatched current elements, in descending index
//!    order (earlier indices stay valid);
//! 2. `Add` steps for unmatched desired elements, in ascending index order.
//!
//! Each step's index is relative to the list state after all earlier steps.
//! Under duplicate-equal elements any occurrence may be matched; the DP
//! keeps the first unclaimed one.
//!
//! # Invariants
//!
//! 1. Applying the script in order to a copy of `current` yields `desired`.
//! 2. Equal sequences produce an empty script.
//! 3. An element of the longest common subsequence is never removed.
//!
//! # Failure Modes
//!
//! - None: the function is total over `T: PartialEq + Clone`. Cost is
//!   O(|desired| × |current|) time and space.

/// One step of an edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DifferenceItem<T> {
    /// Insert `item` at `index`.
    Add {
        /// Position in the evolving sequence.
        index: usize,
        /// The inserted element.
        item: T,
    },
    /// Remove the element at `index` (carried for relocation pairing).
    Remove {
        /// Position in the evolving sequence.
        index: usize,
        /// The removed element.
        item: T,
    },
}

/// Compute the edit script converting `current` into `desired`.
pub fn difference<T: PartialEq + Clone>(desired: &[T], current: &[T]) -> Vec<DifferenceItem<T>> {
    let n = current.len();
    let m = desired.len();

    // LCS length table: lcs[i][j] = LCS of current[i..] and desired[j..].
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if current[i] == desired[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    // Walk the table once, marking matched positions on both sides.
    let mut keep_current = vec![false; n];
    let mut keep_desired = vec![false; m];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if current[i] == desired[j] && lcs[i][j] == lcs[i + 1][j + 1] + 1 {
            keep_current[i] = true;
            keep_desired[j] = true;
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }

    let mut script = Vec::new();
    for idx in (0..n).rev() {
        if !keep_current[idx] {
            script.push(DifferenceItem::Remove {
                index: idx,
                item: current[idx].clone(),
            });
        }
    }
    for (idx, item) in desired.iter().enumerate() {
        if !keep_desired[idx] {
            script.push(DifferenceItem::Add {
                index: idx,
                item: item.clone(),
            });
        }
    }
    script
}

/// Apply `script` to `sequence` in order. Used by tests and by callers that
/// mirror a plain buffer rather than a mapper role.
pub fn apply_script<T: Clone>(sequence: &mut Vec<T>, script: &[DifferenceItem<T>]) {
    for step in script {
        match step {
            DifferenceItem::Add { index, item } => sequence.insert(*index, item.clone()),
            DifferenceItem::Remove { index, .. } => {
                sequence.remove(*index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn converges(desired: &[i32], current: &[i32]) -> Vec<DifferenceItem<i32>> {
        let script = difference(desired, current);
        let mut work = current.to_vec();
        apply_script(&mut work, &script);
        assert_eq!(work, desired, "script must converge to the desired sequence");
        script
    }

    #[test]
    fn equal_sequences_produce_empty_script() {
        assert!(converges(&[1, 2, 3], &[1, 2, 3]).is_empty());
        assert!(converges(&[], &[]).is_empty());
    }

    #[test]
    fn pure_insertion() {
        let script = converges(&[1, 2, 3], &[1, 3]);
        assert_eq!(
            script,
            vec![DifferenceItem::Add { index: 1, item: 2 }]
        );
    }

    #[test]
    fn pure_removal() {
        let script = converges(&[1, 3], &[1, 2, 3]);
        assert_eq!(
            script,
            vec![DifferenceItem::Remove { index: 1, item: 2 }]
        );
    }

    #[test]
    fn rotation_relocates_one_element() {
        // [a, b, c] -> [b, c, a]: move `a`, keep `b` and `c` untouched.
        let script = converges(&[2, 3, 1], &[1, 2, 3]);
        assert_eq!(
            script,
            vec![
                DifferenceItem::Remove { index: 0, item: 1 },
                DifferenceItem::Add { index: 2, item: 1 },
            ]
        );
    }

    #[test]
    fn full_replacement() {
        let script = converges(&[4, 5], &[1, 2]);
        assert_eq!(script.len(), 4);
    }

    #[test]
    fn empty_to_full_and_back() {
        converges(&[1, 2, 3], &[]);
        converges(&[], &[1, 2, 3]);
    }

    #[test]
    fn duplicates_reuse_occurrences() {
        // Two of the three `7`s survive; only one remove is emitted.
        let script = converges(&[7, 7], &[7, 7, 7]);
        assert_eq!(script.len(), 1);
        converges(&[7, 1, 7], &[7, 7]);
        converges(&[7, 7, 7], &[7]);
    }

    #[test]
    fn common_elements_are_not_churned() {
        // Removing the head of a long list must not touch the tail.
        let current: Vec<i32> = (0..50).collect();
        let desired: Vec<i32> = (1..50).collect();
        let script = converges(&desired, &current);
        assert_eq!(
            script,
            vec![DifferenceItem::Remove { index: 0, item: 0 }]
        );
    }

    proptest! {
        #[test]
        fn script_always_converges(
            current in prop::collection::vec(0i32..8, 0..12),
            desired in prop::collection::vec(0i32..8, 0..12),
        ) {
            let script = difference(&desired, &current);
            let mut work = current.clone();
            apply_script(&mut work, &script);
            prop_assert_eq!(work, desired);
        }

        #[test]
        fn script_size_is_bounded_by_unmatched_elements(
            current in prop::collection::vec(0i32..8, 0..12),
            desired in prop::collection::vec(0i32..8, 0..12),
        ) {
            // Never worse than dropping everything and rebuilding.
            let script = difference(&desired, &current);
            prop_assert!(script.len() <= current.len() + desired.len());
            if current == desired {
                prop_assert!(script.is_empty());
            }
        }

        #[test]
        fn reorder_of_distinct_elements_is_all_relocations(
            desired in prop::collection::hash_set(0i32..64, 0..10)
                .prop_map(|s| s.into_iter().collect::<Vec<_>>())
                .prop_shuffle(),
        ) {
            let mut current = desired.clone();
            current.sort_unstable();
            let script = difference(&desired, &current);
            let mut work = current.clone();
            apply_script(&mut work, &script);
            prop_assert_eq!(&work, &desired);
            // Same element set: every Remove is paired with an Add of the
            // same item, i.e. a relocation, never a net destruction.
            let removes: Vec<i32> = script.iter().filter_map(|s| match s {
                DifferenceItem::Remove { item, .. } => Some(*item),
                DifferenceItem::Add { .. } => None,
            }).collect();
            let adds: Vec<i32> = script.iter().filter_map(|s| match s {
                DifferenceItem::Add { item, .. } => Some(*item),
                DifferenceItem::Remove { .. } => None,
            }).collect();
            let mut removes_sorted = removes.clone();
            let mut adds_sorted = adds.clone();
            removes_sorted.sort_unstable();
            adds_sorted.sort_unstable();
            prop_assert_eq!(removes_sorted, adds_sorted);
        }
    }
}
