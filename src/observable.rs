//! Change notification primitives
//!
//! - [`Notifier`]: subscriber list handing out RAII [`Subscription`] guards.
//!   Callbacks are held weakly and pruned lazily during notification.
//! - [`CollectionChange`]: the collection-change surface (add, remove,
//!   replace, move, reset).
//! - [`ObservableList`]: a shared `Vec` that emits a [`CollectionChange`]
//!   after every mutation.
//! - [`NotifyingSequence`]: anything that can be snapshotted and observed;
//!   mirrors consume sources through this trait.
//!
//! Notification never holds a borrow while callbacks run, so subscribers
//! may mutate the collection that notified them.
//!
//! Author: Moroya Sakamoto

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Result, TreeError};

/// RAII guard for a subscriber callback.
///
/// Dropping the guard drops the only strong reference to the callback; the
/// weak entry left in the subscriber list is pruned on the next notify.
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Ordered subscriber list for events of type `E`
pub struct Notifier<E: ?Sized> {
    subscribers: RefCell<Vec<Weak<dyn Fn(&E)>>>,
}

impl<E: ?Sized> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
        }
    }
}

impl<E: ?Sized> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

impl<E: ?Sized + 'static> Notifier<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered while the guard lives.
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&E)> = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Call live subscribers in registration order.
    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Rc<dyn Fn(&E)>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

}

impl<E: ?Sized> Notifier<E> {
    /// Registered subscribers, including dead ones not yet pruned
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscribers.borrow().iter().any(|w| w.strong_count() > 0)
    }
}

/// A change to an ordered collection
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    Add {
        items: Vec<T>,
        index: usize,
    },
    Remove {
        items: Vec<T>,
        index: usize,
    },
    Replace {
        new_items: Vec<T>,
        old_items: Vec<T>,
        index: usize,
    },
    Move {
        items: Vec<T>,
        new_index: usize,
        old_index: usize,
    },
    Reset,
}

impl<T> CollectionChange<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            CollectionChange::Add { .. } => "add",
            CollectionChange::Remove { .. } => "remove",
            CollectionChange::Replace { .. } => "replace",
            CollectionChange::Move { .. } => "move",
            CollectionChange::Reset => "reset",
        }
    }

    /// Map every carried item, keeping the shape and indices
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> CollectionChange<U> {
        let mut all = |items: &[T]| items.iter().map(&mut f).collect::<Vec<U>>();
        match self {
            CollectionChange::Add { items, index } => CollectionChange::Add {
                items: all(items),
                index: *index,
            },
            CollectionChange::Remove { items, index } => CollectionChange::Remove {
                items: all(items),
                index: *index,
            },
            CollectionChange::Replace {
                new_items,
                old_items,
                index,
            } => CollectionChange::Replace {
                new_items: all(new_items),
                old_items: all(old_items),
                index: *index,
            },
            CollectionChange::Move {
                items,
                new_index,
                old_index,
            } => CollectionChange::Move {
                items: all(items),
                new_index: *new_index,
                old_index: *old_index,
            },
            CollectionChange::Reset => CollectionChange::Reset,
        }
    }
}

/// An ordered collection that can be read whole and observed.
pub trait NotifyingSequence<T> {
    /// Current contents, in order
    fn snapshot(&self) -> Vec<T>;

    /// Observe every subsequent change
    fn observe(&self, callback: Box<dyn Fn(&CollectionChange<T>)>) -> Subscription;
}

struct ListInner<T> {
    items: RefCell<Vec<T>>,
    notifier: Notifier<CollectionChange<T>>,
}

/// Shared, notification-emitting list. Clones are handles to the same list.
pub struct ObservableList<T> {
    inner: Rc<ListInner<T>>,
}

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("items", &*self.inner.items.borrow())
            .field("subscribers", &self.inner.notifier.subscriber_count())
            .finish()
    }
}

impl<T: Clone + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> From<Vec<T>> for ObservableList<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                items: RefCell::new(items),
                notifier: Notifier::new(),
            }),
        }
    }
}

impl<T: Clone + 'static> ObservableList<T> {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    /// Access the items by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.items.borrow())
    }

    /// Two handles to the same list
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn subscribe(&self, callback: impl Fn(&CollectionChange<T>) + 'static) -> Subscription {
        self.inner.notifier.subscribe(callback)
    }

    pub fn push(&self, item: T) {
        let index = self.len();
        self.insert_unchecked(index, item);
    }

    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.check_position(index)?;
        self.insert_unchecked(index, item);
        Ok(())
    }

    /// Insert several items with a single `Add` notification.
    pub fn insert_range(&self, index: usize, items: Vec<T>) -> Result<()> {
        self.check_position(index)?;
        self.insert_range_unchecked(index, items);
        Ok(())
    }

    pub fn extend(&self, items: Vec<T>) {
        self.insert_range_unchecked(self.len(), items);
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        Ok(self.remove_unchecked(index))
    }

    /// Remove the first item equal to `item`.
    pub fn remove_item(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let position = self.inner.items.borrow().iter().position(|x| x == item);
        match position {
            Some(index) => {
                self.remove_unchecked(index);
                true
            }
            None => false,
        }
    }

    /// Replace the item at `index`, returning the old one.
    pub fn replace(&self, index: usize, item: T) -> Result<T> {
        self.check_index(index)?;
        Ok(self.replace_unchecked(index, item))
    }

    pub fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        self.check_index(old_index)?;
        self.check_index(new_index)?;
        if old_index != new_index {
            self.move_unchecked(old_index, new_index);
        }
        Ok(())
    }

    /// Drop everything past `len` with a single `Remove` notification.
    pub fn truncate(&self, len: usize) {
        let removed: Vec<T> = {
            let mut items = self.inner.items.borrow_mut();
            if len >= items.len() {
                return;
            }
            items.drain(len..).collect()
        };
        self.emit(CollectionChange::Remove {
            items: removed,
            index: len,
        });
    }

    pub fn clear(&self) {
        self.inner.items.borrow_mut().clear();
        self.emit(CollectionChange::Reset);
    }

    /// Swap in new contents wholesale.
    pub fn reset_with(&self, items: Vec<T>) {
        *self.inner.items.borrow_mut() = items;
        self.emit(CollectionChange::Reset);
    }

    pub(crate) fn insert_unchecked(&self, index: usize, item: T) {
        self.inner.items.borrow_mut().insert(index, item.clone());
        self.emit(CollectionChange::Add {
            items: vec![item],
            index,
        });
    }

    fn insert_range_unchecked(&self, index: usize, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        {
            let mut current = self.inner.items.borrow_mut();
            let tail = current.split_off(index);
            current.extend(items.iter().cloned());
            current.extend(tail);
        }
        self.emit(CollectionChange::Add { items, index });
    }

    pub(crate) fn remove_unchecked(&self, index: usize) -> T {
        let item = self.inner.items.borrow_mut().remove(index);
        self.emit(CollectionChange::Remove {
            items: vec![item.clone()],
            index,
        });
        item
    }

    pub(crate) fn replace_unchecked(&self, index: usize, item: T) -> T {
        let old = std::mem::replace(&mut self.inner.items.borrow_mut()[index], item.clone());
        self.emit(CollectionChange::Replace {
            new_items: vec![item],
            old_items: vec![old.clone()],
            index,
        });
        old
    }

    pub(crate) fn move_unchecked(&self, old_index: usize, new_index: usize) {
        let item = {
            let mut items = self.inner.items.borrow_mut();
            let item = items.remove(old_index);
            items.insert(new_index, item.clone());
            item
        };
        self.emit(CollectionChange::Move {
            items: vec![item],
            new_index,
            old_index,
        });
    }

    fn emit(&self, change: CollectionChange<T>) {
        self.inner.notifier.notify(&change);
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.len();
        if index < len {
            Ok(())
        } else {
            Err(TreeError::out_of_range(index, len))
        }
    }

    fn check_position(&self, index: usize) -> Result<()> {
        let len = self.len();
        if index <= len {
            Ok(())
        } else {
            Err(TreeError::out_of_range(index, len))
        }
    }
}

impl<T: Clone + 'static> NotifyingSequence<T> for ObservableList<T> {
    fn snapshot(&self) -> Vec<T> {
        self.to_vec()
    }

    fn observe(&self, callback: Box<dyn Fn(&CollectionChange<T>)>) -> Subscription {
        self.inner.notifier.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder<T: Clone + 'static>(
        list: &ObservableList<T>,
    ) -> (Rc<RefCell<Vec<CollectionChange<T>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = list.subscribe(move |c| sink.borrow_mut().push(c.clone()));
        (log, sub)
    }

    #[test]
    fn test_push_emits_add_at_end() {
        let list = ObservableList::from(vec![1, 2]);
        let (log, _sub) = recorder(&list);
        list.push(3);
        assert_eq!(list.to_vec(), vec![1, 2, 3]);
        assert_eq!(
            log.borrow()[0],
            CollectionChange::Add {
                items: vec![3],
                index: 2
            }
        );
    }

    #[test]
    fn test_replace_and_move_shapes() {
        let list = ObservableList::from(vec!['a', 'b', 'c']);
        let (log, _sub) = recorder(&list);
        assert_eq!(list.replace(1, 'x').unwrap(), 'b');
        list.move_item(2, 0).unwrap();
        assert_eq!(list.to_vec(), vec!['c', 'a', 'x']);
        let log = log.borrow();
        assert_eq!(
            log[0],
            CollectionChange::Replace {
                new_items: vec!['x'],
                old_items: vec!['b'],
                index: 1
            }
        );
        assert_eq!(
            log[1],
            CollectionChange::Move {
                items: vec!['c'],
                new_index: 0,
                old_index: 2
            }
        );
    }

    #[test]
    fn test_truncate_emits_single_remove() {
        let list = ObservableList::from(vec![1, 2, 3, 4]);
        let (log, _sub) = recorder(&list);
        list.truncate(1);
        assert_eq!(list.to_vec(), vec![1]);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(
            log.borrow()[0],
            CollectionChange::Remove {
                items: vec![2, 3, 4],
                index: 1
            }
        );
        list.truncate(5);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let list = ObservableList::from(vec![1]);
        assert_eq!(list.insert(3, 9), Err(TreeError::out_of_range(3, 1)));
        assert!(list.remove_at(1).is_err());
        assert!(list.replace(7, 0).is_err());
        assert!(list.move_item(0, 1).is_err());
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let list = ObservableList::<u8>::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = list.subscribe(move |_| h.set(h.get() + 1));
        list.push(1);
        drop(sub);
        list.push(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_subscriber_may_mutate_during_notify() {
        let list = ObservableList::from(vec![0]);
        let handle = list.clone();
        let _sub = list.subscribe(move |c| {
            if let CollectionChange::Add { items, .. } = c {
                if items[0] < 3 {
                    handle.push(items[0] + 1);
                }
            }
        });
        list.push(1);
        assert_eq!(list.to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_change_map_keeps_shape() {
        let change = CollectionChange::Move {
            items: vec![1, 2],
            new_index: 4,
            old_index: 0,
        };
        assert_eq!(
            change.map(|x| x * 10),
            CollectionChange::Move {
                items: vec![10, 20],
                new_index: 4,
                old_index: 0
            }
        );
        assert_eq!(change.kind(), "move");
    }

    #[test]
    fn test_insert_range_and_clear() {
        let list = ObservableList::from(vec![1, 4]);
        let (log, _sub) = recorder(&list);
        list.insert_range(1, vec![2, 3]).unwrap();
        assert_eq!(list.to_vec(), vec![1, 2, 3, 4]);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(log.borrow()[1], CollectionChange::Reset);
    }

    #[test]
    fn test_extend_emits_single_add_at_end() {
        let list = ObservableList::from(vec![1]);
        let (log, _sub) = recorder(&list);
        list.extend(vec![2, 3]);
        list.extend(Vec::new());
        assert_eq!(list.to_vec(), vec![1, 2, 3]);
        assert_eq!(
            *log.borrow(),
            vec![CollectionChange::Add {
                items: vec![2, 3],
                index: 1
            }]
        );
    }

    // ── Debug ──

    #[test]
    fn test_debug_shows_items_and_subscribers() {
        let list = ObservableList::from(vec![7, 8]);
        let _sub = list.subscribe(|_| {});
        let text = format!("{:?}", list);
        assert!(text.contains("ObservableList"));
        assert!(text.contains("[7, 8]"));
        assert!(text.contains("subscribers: 1"));

        let notifier = Notifier::<str>::new();
        assert_eq!(notifier.subscriber_count(), 0);
        assert!(!notifier.has_subscribers());
    }
}
