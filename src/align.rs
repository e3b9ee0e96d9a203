//! Sequence aligner
//!
//! Edits a live ordered collection in place until it equals a target
//! sequence, using moves before inserts before replaces, then trimming
//! the tail. Elements already present are moved rather than recreated,
//! so observers of the live collection keep seeing the same elements.
//!
//! Walk, for each target position `i`:
//! 1. `live[i]` matches: keep it
//! 2. a later `live[j]` matches: move `j -> i`
//! 3. `live[i]` is still wanted further on in the target: insert before it
//! 4. otherwise overwrite `live[i]` (or append past the end)
//!
//! After position `i` the prefix `live[..=i]` equals `target[..=i]`, so
//! the walk converges, and a second run over its own output does nothing.
//! Not LCS-minimal.
//!
//! Author: Moroya Sakamoto

use tracing::debug;

use crate::observable::ObservableList;

/// Mutable ordered collection the aligner can drive
pub trait LiveSequence<T> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `pred` to the element at `index` (false when out of range).
    fn test_at(&self, index: usize, pred: &mut dyn FnMut(&T) -> bool) -> bool;

    fn move_item(&mut self, old_index: usize, new_index: usize);

    fn insert_at(&mut self, index: usize, item: T);

    fn replace_at(&mut self, index: usize, item: T);

    fn truncate(&mut self, len: usize);

    /// Append in one step
    fn append_all(&mut self, items: Vec<T>);

    fn clear(&mut self);
}

impl<T> LiveSequence<T> for Vec<T> {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn test_at(&self, index: usize, pred: &mut dyn FnMut(&T) -> bool) -> bool {
        self.get(index).is_some_and(pred)
    }

    fn move_item(&mut self, old_index: usize, new_index: usize) {
        let item = self.remove(old_index);
        self.insert(new_index, item);
    }

    fn insert_at(&mut self, index: usize, item: T) {
        self.insert(index, item);
    }

    fn replace_at(&mut self, index: usize, item: T) {
        self[index] = item;
    }

    fn truncate(&mut self, len: usize) {
        Vec::truncate(self, len);
    }

    fn append_all(&mut self, items: Vec<T>) {
        self.extend(items);
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }
}

impl<T: Clone + 'static> LiveSequence<T> for ObservableList<T> {
    fn len(&self) -> usize {
        ObservableList::len(self)
    }

    fn test_at(&self, index: usize, pred: &mut dyn FnMut(&T) -> bool) -> bool {
        self.with(|items| items.get(index).is_some_and(pred))
    }

    fn move_item(&mut self, old_index: usize, new_index: usize) {
        self.move_unchecked(old_index, new_index);
    }

    fn insert_at(&mut self, index: usize, item: T) {
        self.insert_unchecked(index, item);
    }

    fn replace_at(&mut self, index: usize, item: T) {
        self.replace_unchecked(index, item);
    }

    fn truncate(&mut self, len: usize) {
        ObservableList::truncate(self, len);
    }

    fn append_all(&mut self, items: Vec<T>) {
        self.extend(items);
    }

    fn clear(&mut self) {
        ObservableList::clear(self);
    }
}

/// Edit counts from one alignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignReport {
    pub moves: usize,
    pub inserts: usize,
    pub replaces: usize,
    pub removes: usize,
}

impl AlignReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    pub fn total(&self) -> usize {
        self.moves + self.inserts + self.replaces + self.removes
    }
}

/// Align `live` to `target` using `==`.
pub fn align<T, L>(live: &mut L, target: &[T]) -> AlignReport
where
    T: Clone + PartialEq,
    L: LiveSequence<T> + ?Sized,
{
    align_by(live, target, |a, b| a == b)
}

/// Align `live` to `target` under `eq`.
///
/// Ties go to the leftmost candidate: step 2 moves the first later match.
pub fn align_by<T, L>(live: &mut L, target: &[T], mut eq: impl FnMut(&T, &T) -> bool) -> AlignReport
where
    T: Clone,
    L: LiveSequence<T> + ?Sized,
{
    let mut report = AlignReport::default();

    if target.is_empty() {
        report.removes = live.len();
        if report.removes > 0 {
            live.clear();
        }
        return report;
    }
    if live.is_empty() {
        report.inserts = target.len();
        live.append_all(target.to_vec());
        return report;
    }

    for (i, wanted) in target.iter().enumerate() {
        if live.test_at(i, &mut |item| eq(item, wanted)) {
            continue;
        }
        let len = live.len();
        if let Some(j) = (i + 1..len).find(|&j| live.test_at(j, &mut |item| eq(item, wanted))) {
            live.move_item(j, i);
            report.moves += 1;
        } else if i >= len {
            live.insert_at(i, wanted.clone());
            report.inserts += 1;
        } else if target[i + 1..]
            .iter()
            .any(|later| live.test_at(i, &mut |item| eq(item, later)))
        {
            live.insert_at(i, wanted.clone());
            report.inserts += 1;
        } else {
            live.replace_at(i, wanted.clone());
            report.replaces += 1;
        }
    }

    if live.len() > target.len() {
        report.removes = live.len() - target.len();
        live.truncate(target.len());
    }

    debug!(
        moves = report.moves,
        inserts = report.inserts,
        replaces = report.replaces,
        removes = report.removes,
        "aligned sequence"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::CollectionChange;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_rotation_is_a_single_move() {
        let list = ObservableList::from(vec![1, 2, 3]);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = list.subscribe(move |c| sink.borrow_mut().push(c.clone()));

        let report = align(&mut list.clone(), &[3, 1, 2]);
        assert_eq!(list.to_vec(), vec![3, 1, 2]);
        assert_eq!(
            report,
            AlignReport {
                moves: 1,
                ..AlignReport::default()
            }
        );
        assert_eq!(
            *log.borrow(),
            vec![CollectionChange::Move {
                items: vec![3],
                new_index: 0,
                old_index: 2
            }]
        );
    }

    #[test]
    fn test_replace_when_no_later_home() {
        let mut live = vec![1, 2, 3];
        let report = align(&mut live, &[4, 2, 3]);
        assert_eq!(live, vec![4, 2, 3]);
        assert_eq!(report.replaces, 1);
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn test_insert_before_element_still_wanted() {
        let mut live = vec![2, 3];
        let report = align(&mut live, &[1, 2, 3]);
        assert_eq!(live, vec![1, 2, 3]);
        assert_eq!(report.inserts, 1);
        assert_eq!(report.replaces, 0);
    }

    #[test]
    fn test_trailing_items_removed() {
        let mut live = vec![1, 2, 3, 4];
        let report = align(&mut live, &[1, 3]);
        assert_eq!(live, vec![1, 3]);
        assert_eq!(report.moves, 1);
        assert_eq!(report.removes, 2);
    }

    #[test]
    fn test_empty_edges() {
        let mut live: Vec<u8> = Vec::new();
        assert_eq!(align(&mut live, &[1, 2]).inserts, 2);
        assert_eq!(live, vec![1, 2]);
        assert_eq!(align(&mut live, &[]).removes, 2);
        assert!(live.is_empty());
        assert!(align(&mut live, &[]).is_noop());
    }

    #[test]
    fn test_bulk_insert_is_one_notification() {
        let list = ObservableList::<char>::new();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let _sub = list.subscribe(move |_| *sink.borrow_mut() += 1);
        align(&mut list.clone(), &['a', 'b', 'c']);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_custom_equality_keeps_live_elements() {
        // Equality on the key only: matched elements are kept, not overwritten.
        let mut live = vec![(1, "old"), (2, "old")];
        let report = align_by(&mut live, &[(2, "new"), (1, "new")], |a, b| a.0 == b.0);
        assert_eq!(live, vec![(2, "old"), (1, "old")]);
        assert_eq!(report.moves, 1);
    }

    #[test]
    fn test_duplicates_take_leftmost_match() {
        let mut live = vec!['x', 'a', 'b', 'a'];
        align(&mut live, &['a', 'b', 'a']);
        assert_eq!(live, vec!['a', 'b', 'a']);
    }

    proptest! {
        #[test]
        fn test_alignment_converges(
            live in prop::collection::vec(0u8..6, 0..12),
            target in prop::collection::vec(0u8..6, 0..12),
        ) {
            let mut live = live;
            align(&mut live, &target);
            prop_assert_eq!(&live, &target);
        }

        #[test]
        fn test_alignment_is_idempotent(
            live in prop::collection::vec(0u8..6, 0..12),
            target in prop::collection::vec(0u8..6, 0..12),
        ) {
            let mut live = live;
            align(&mut live, &target);
            prop_assert!(align(&mut live, &target).is_noop());
        }

        #[test]
        fn test_observable_list_converges(
            live in prop::collection::vec(0u8..4, 0..8),
            target in prop::collection::vec(0u8..4, 0..8),
        ) {
            let list = ObservableList::from(live);
            align(&mut list.clone(), &target);
            prop_assert_eq!(list.to_vec(), target);
        }
    }
}
