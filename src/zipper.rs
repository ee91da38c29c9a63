//! # Sort-Merge Zipper
//!
//! One-pass left outer merge of two sequences sorted ascending by a shared
//! key order. Every left element is emitted exactly once, paired with the
//! right element whose key compares equal, or with nothing.
//!
//! The right side is pulled lazily and never rewound; one pending right
//! element is buffered. Key order regressions on either side abort the merge
//! with [`ReconstructionError::UnsortedInput`].

use crate::error::ReconstructionError;
use crate::keys::{KeyedEvent, KeyedState, PartitionKey};
use std::cmp::Ordering;
use std::fmt::Debug;

/// Access to the key a record is merged on.
pub trait ZipKey {
    type Key: Clone + Debug;

    fn zip_key(&self) -> &Self::Key;
}

impl ZipKey for KeyedEvent {
    type Key = PartitionKey;

    fn zip_key(&self) -> &PartitionKey {
        &self.key.partition
    }
}

impl ZipKey for KeyedState {
    type Key = PartitionKey;

    fn zip_key(&self) -> &PartitionKey {
        &self.key.partition
    }
}

impl<T: ZipKey> ZipKey for &T {
    type Key = T::Key;

    fn zip_key(&self) -> &T::Key {
        (**self).zip_key()
    }
}

impl<K: Clone + Debug, V> ZipKey for (K, V) {
    type Key = K;

    fn zip_key(&self) -> &K {
        &self.0
    }
}

/// Iterator produced by [`left_outer_zip`].
pub struct LeftOuterZip<L, R, C, J>
where
    L: Iterator,
    R: Iterator,
    L::Item: ZipKey,
{
    left: L,
    right: R,
    compare: C,
    join: J,
    pending: Option<R::Item>,
    right_exhausted: bool,
    last_left_key: Option<<L::Item as ZipKey>::Key>,
    last_right_key: Option<<L::Item as ZipKey>::Key>,
    failed: bool,
}

/// Merge `left` and `right` (both sorted ascending under `compare`) into one
/// output per left element.
///
/// `join` receives each left element with its equal-keyed right element, if
/// any. A left element may share its match with following left elements of
/// the same key.
pub fn left_outer_zip<L, R, K, C, J, O>(
    compare: C,
    join: J,
    left: L,
    right: R,
) -> LeftOuterZip<L::IntoIter, R::IntoIter, C, J>
where
    L: IntoIterator,
    R: IntoIterator,
    L::Item: ZipKey<Key = K>,
    R::Item: ZipKey<Key = K>,
    K: Clone + Debug,
    C: Fn(&K, &K) -> Ordering,
    J: FnMut(L::Item, Option<&R::Item>) -> O,
{
    LeftOuterZip {
        left: left.into_iter(),
        right: right.into_iter(),
        compare,
        join,
        pending: None,
        right_exhausted: false,
        last_left_key: None,
        last_right_key: None,
        failed: false,
    }
}

/// Run [`left_outer_zip`] to completion, failing on the first order violation.
pub fn collect_left_outer_zip<L, R, K, C, J, O>(
    compare: C,
    join: J,
    left: L,
    right: R,
) -> Result<Vec<O>, ReconstructionError>
where
    L: IntoIterator,
    R: IntoIterator,
    L::Item: ZipKey<Key = K>,
    R::Item: ZipKey<Key = K>,
    K: Clone + Debug,
    C: Fn(&K, &K) -> Ordering,
    J: FnMut(L::Item, Option<&R::Item>) -> O,
{
    left_outer_zip(compare, join, left, right).collect()
}

impl<L, R, K, C, J, O> LeftOuterZip<L, R, C, J>
where
    L: Iterator,
    R: Iterator,
    L::Item: ZipKey<Key = K>,
    R::Item: ZipKey<Key = K>,
    K: Clone + Debug,
    C: Fn(&K, &K) -> Ordering,
    J: FnMut(L::Item, Option<&R::Item>) -> O,
{
    /// Ensure a pending right element exists, pulling one if needed.
    fn fill_pending(&mut self) -> Result<(), ReconstructionError> {
        if self.pending.is_some() || self.right_exhausted {
            return Ok(());
        }
        match self.right.next() {
            None => self.right_exhausted = true,
            Some(item) => {
                let key = item.zip_key();
                if let Some(previous) = &self.last_right_key {
                    if (self.compare)(key, previous) == Ordering::Less {
                        return Err(ReconstructionError::UnsortedInput {
                            side: "right",
                            detail: format!("{:?} follows {:?}", key, previous),
                        });
                    }
                }
                self.last_right_key = Some(key.clone());
                self.pending = Some(item);
            }
        }
        Ok(())
    }

    fn step(&mut self, item: L::Item) -> Result<O, ReconstructionError> {
        let key = item.zip_key().clone();
        if let Some(previous) = &self.last_left_key {
            if (self.compare)(&key, previous) == Ordering::Less {
                return Err(ReconstructionError::UnsortedInput {
                    side: "left",
                    detail: format!("{:?} follows {:?}", key, previous),
                });
            }
        }
        self.last_left_key = Some(key);

        loop {
            self.fill_pending()?;
            let ordering = match &self.pending {
                None => break,
                Some(head) => (self.compare)(item.zip_key(), head.zip_key()),
            };
            match ordering {
                Ordering::Less => break,
                Ordering::Equal => return Ok((self.join)(item, self.pending.as_ref())),
                Ordering::Greater => self.pending = None,
            }
        }
        Ok((self.join)(item, None))
    }
}

impl<L, R, K, C, J, O> Iterator for LeftOuterZip<L, R, C, J>
where
    L: Iterator,
    R: Iterator,
    L::Item: ZipKey<Key = K>,
    R::Item: ZipKey<Key = K>,
    K: Clone + Debug,
    C: Fn(&K, &K) -> Ordering,
    J: FnMut(L::Item, Option<&R::Item>) -> O,
{
    type Item = Result<O, ReconstructionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.left.next()?;
        let result = self.step(item);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            self.left.size_hint()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn zip_pairs(
        left: Vec<(i32, &'static str)>,
        right: Vec<(i32, &'static str)>,
    ) -> Result<Vec<(&'static str, Option<&'static str>)>, ReconstructionError> {
        collect_left_outer_zip(
            |a: &i32, b: &i32| a.cmp(b),
            |l: (i32, &'static str), r: Option<&(i32, &'static str)>| (l.1, r.map(|r| r.1)),
            left,
            right,
        )
    }

    #[test]
    fn test_pairs_equal_keys_and_keeps_unmatched() {
        let out = zip_pairs(
            vec![(1, "a"), (2, "b"), (2, "b2"), (4, "d")],
            vec![(0, "z"), (2, "B"), (3, "C"), (5, "E")],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![("a", None), ("b", Some("B")), ("b2", Some("B")), ("d", None)]
        );
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(zip_pairs(vec![], vec![(1, "x")]).unwrap(), vec![]);
        assert_eq!(
            zip_pairs(vec![(1, "a")], vec![]).unwrap(),
            vec![("a", None)]
        );
    }

    #[test]
    fn test_disjoint_ranges() {
        let out = zip_pairs(vec![(10, "a"), (11, "b")], vec![(1, "x"), (2, "y")]).unwrap();
        assert_eq!(out, vec![("a", None), ("b", None)]);
        let out = zip_pairs(vec![(1, "a"), (2, "b")], vec![(10, "x"), (11, "y")]).unwrap();
        assert_eq!(out, vec![("a", None), ("b", None)]);
    }

    #[test]
    fn test_unsorted_left_is_fatal() {
        let err = zip_pairs(vec![(2, "b"), (1, "a")], vec![(1, "A")]).unwrap_err();
        assert!(matches!(err, ReconstructionError::UnsortedInput { side: "left", .. }));
    }

    #[test]
    fn test_unsorted_right_is_fatal() {
        let err = zip_pairs(vec![(5, "e")], vec![(3, "C"), (1, "A")]).unwrap_err();
        assert!(matches!(err, ReconstructionError::UnsortedInput { side: "right", .. }));
    }

    #[test]
    fn test_stops_after_failure() {
        let mut zip = left_outer_zip(
            |a: &i32, b: &i32| a.cmp(b),
            |l: (i32, ()), _r: Option<&(i32, ())>| l.0,
            vec![(3, ()), (1, ()), (4, ())],
            Vec::<(i32, ())>::new(),
        );
        assert_eq!(zip.next(), Some(Ok(3)));
        assert!(matches!(zip.next(), Some(Err(_))));
        assert_eq!(zip.next(), None);
    }

    #[test]
    fn test_right_is_pulled_lazily() {
        let pulled = Cell::new(0usize);
        let right = (0..1_000).map(|k| {
            pulled.set(pulled.get() + 1);
            (k, ())
        });
        let out = collect_left_outer_zip(
            |a: &i32, b: &i32| a.cmp(b),
            |l: (i32, ()), r: Option<&(i32, ())>| (l.0, r.is_some()),
            vec![(2, ()), (3, ())],
            right,
        )
        .unwrap();
        assert_eq!(out, vec![(2, true), (3, true)]);
        // 0, 1, 2, 3 pulled; nothing beyond the last match
        assert_eq!(pulled.get(), 4);
    }
}
