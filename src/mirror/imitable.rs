//! Single-source identity-paired mirror
//!
//! Every source element is converted at most once while it stays in the
//! source. On each source change the pairs are rebuilt against the new
//! source snapshot: elements still present (by identity) keep their
//! derived element, new ones are converted, and pairs whose source left
//! are handed to the removal callback exactly once.
//!
//! Author: Moroya Sakamoto

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Result, TreeError};
use crate::identity::Identity;
use crate::observable::{CollectionChange, Notifier, NotifyingSequence, Subscription};

/// A source element and the element derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityPair<S, D> {
    pub source: S,
    pub derived: D,
}

struct ImitableState<S, D> {
    pairs: Vec<IdentityPair<S, D>>,
    /// `Some` while imitating
    subscription: Option<Subscription>,
    disposed: bool,
}

struct ImitableInner<S, D> {
    source: Box<dyn NotifyingSequence<S>>,
    convert: Box<dyn Fn(&S) -> D>,
    on_remove: RefCell<Option<Box<dyn Fn(&D)>>>,
    state: RefCell<ImitableState<S, D>>,
    notifier: Notifier<CollectionChange<D>>,
}

/// Converted view of one notifying source. Clones share the mirror.
pub struct ImitableCollection<S, D> {
    inner: Rc<ImitableInner<S, D>>,
}

impl<S, D> Clone for ImitableCollection<S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, D: fmt::Debug> fmt::Debug for ImitableCollection<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        let derived: Vec<&D> = state.pairs.iter().map(|p| &p.derived).collect();
        f.debug_struct("ImitableCollection")
            .field("items", &derived)
            .field("imitating", &state.subscription.is_some())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl<S, D> ImitableCollection<S, D>
where
    S: Identity + Clone + 'static,
    D: Clone + 'static,
{
    /// Mirror `source`, converting each element with `convert`.
    /// Imitation starts immediately.
    pub fn new(
        source: impl NotifyingSequence<S> + 'static,
        convert: impl Fn(&S) -> D + 'static,
    ) -> Self {
        let mirror = Self {
            inner: Rc::new(ImitableInner {
                source: Box::new(source),
                convert: Box::new(convert),
                on_remove: RefCell::new(None),
                state: RefCell::new(ImitableState {
                    pairs: Vec::new(),
                    subscription: None,
                    disposed: false,
                }),
                notifier: Notifier::new(),
            }),
        };
        mirror.attach();
        mirror.inner.rebuild();
        mirror
    }

    /// Called once for every derived element that leaves the mirror.
    pub fn with_removal(self, on_remove: impl Fn(&D) + 'static) -> Self {
        *self.inner.on_remove.borrow_mut() = Some(Box::new(on_remove));
        self
    }

    pub fn subscribe(&self, callback: impl Fn(&CollectionChange<D>) + 'static) -> Subscription {
        self.inner.notifier.subscribe(callback)
    }

    pub fn items(&self) -> Result<Vec<D>> {
        self.ensure_alive()?;
        Ok(self.inner.derived())
    }

    pub fn get(&self, index: usize) -> Result<Option<D>> {
        self.ensure_alive()?;
        Ok(self
            .inner
            .state
            .borrow()
            .pairs
            .get(index)
            .map(|p| p.derived.clone()))
    }

    pub fn pairs(&self) -> Result<Vec<IdentityPair<S, D>>> {
        self.ensure_alive()?;
        Ok(self.inner.state.borrow().pairs.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_imitating(&self) -> bool {
        self.inner.state.borrow().subscription.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    /// Stop following the source. Every derived element goes through the
    /// removal callback and subscribers see `Reset`.
    pub fn pause(&self) -> Result<()> {
        self.ensure_alive()?;
        if !self.is_imitating() {
            return Ok(());
        }
        let released = self.inner.release();
        debug!(released = released.len(), "mirror paused");
        self.inner.notifier.notify(&CollectionChange::Reset);
        Ok(())
    }

    /// Follow the source again; subscribers see one `Add` of everything.
    pub fn resume(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.is_imitating() {
            return Ok(());
        }
        self.attach();
        let removed = self.inner.rebuild();
        self.inner.release_pairs(&removed);
        let items = self.inner.derived();
        debug!(len = items.len(), "mirror resumed");
        if !items.is_empty() {
            self.inner
                .notifier
                .notify(&CollectionChange::Add { items, index: 0 });
        }
        Ok(())
    }

    /// Re-read the source now and report `Reset`. No-op while paused.
    pub fn refresh(&self) -> Result<()> {
        self.ensure_alive()?;
        if !self.is_imitating() {
            return Ok(());
        }
        let removed = self.inner.rebuild();
        self.inner.release_pairs(&removed);
        self.inner.notifier.notify(&CollectionChange::Reset);
        Ok(())
    }

    /// Detach from the source and release every derived element.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.release();
        self.inner.state.borrow_mut().disposed = true;
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            Err(TreeError::UseAfterDispose { object: "imitable collection" })
        } else {
            Ok(())
        }
    }

    fn attach(&self) {
        let weak: Weak<ImitableInner<S, D>> = Rc::downgrade(&self.inner);
        let subscription = self.inner.source.observe(Box::new(move |change: &CollectionChange<S>| {
            if let Some(inner) = weak.upgrade() {
                inner.on_source_changed(change);
            }
        }));
        self.inner.state.borrow_mut().subscription = Some(subscription);
    }
}

impl<S, D> ImitableInner<S, D>
where
    S: Identity + Clone + 'static,
    D: Clone + 'static,
{
    fn derived(&self) -> Vec<D> {
        self.state
            .borrow()
            .pairs
            .iter()
            .map(|p| p.derived.clone())
            .collect()
    }

    /// Re-pair against the current source, returning pairs that left.
    fn rebuild(&self) -> Vec<IdentityPair<S, D>> {
        let snapshot = self.source.snapshot();
        let old = std::mem::take(&mut self.state.borrow_mut().pairs);

        // identity -> positions in `old`, rightmost first so `pop` takes the leftmost
        let mut buckets: FxHashMap<usize, SmallVec<[usize; 2]>> = FxHashMap::default();
        for (k, pair) in old.iter().enumerate().rev() {
            buckets.entry(pair.source.identity()).or_default().push(k);
        }
        let mut old: Vec<Option<IdentityPair<S, D>>> = old.into_iter().map(Some).collect();

        let mut pairs = Vec::with_capacity(snapshot.len());
        let mut converted = 0usize;
        for source in snapshot {
            let reused = buckets
                .get_mut(&source.identity())
                .and_then(SmallVec::pop)
                .and_then(|k| old[k].take());
            let pair = match reused {
                Some(pair) => pair,
                None => {
                    converted += 1;
                    IdentityPair {
                        derived: (self.convert)(&source),
                        source,
                    }
                }
            };
            pairs.push(pair);
        }
        self.state.borrow_mut().pairs = pairs;

        let removed: Vec<_> = old.into_iter().flatten().collect();
        debug!(converted, removed = removed.len(), "mirror rebuilt");
        removed
    }

    fn release_pairs(&self, pairs: &[IdentityPair<S, D>]) {
        if let Some(on_remove) = self.on_remove.borrow().as_ref() {
            for pair in pairs {
                on_remove(&pair.derived);
            }
        }
    }

    /// Drop the subscription and every pair, running the removal callback.
    fn release(&self) -> Vec<IdentityPair<S, D>> {
        let (subscription, pairs) = {
            let mut state = self.state.borrow_mut();
            (state.subscription.take(), std::mem::take(&mut state.pairs))
        };
        drop(subscription);
        self.release_pairs(&pairs);
        pairs
    }

    fn on_source_changed(&self, change: &CollectionChange<S>) {
        let removed = self.rebuild();
        self.release_pairs(&removed);
        let translated = self.translate(change, &removed);
        self.notifier.notify(&translated);
    }

    /// Same-shape change over derived elements, or `Reset` when the
    /// pairs do not line up with the source event.
    fn translate(
        &self,
        change: &CollectionChange<S>,
        removed: &[IdentityPair<S, D>],
    ) -> CollectionChange<D> {
        let translated = match change {
            CollectionChange::Add { items, index } => self
                .current(items, *index)
                .map(|items| CollectionChange::Add { items, index: *index }),
            CollectionChange::Remove { items, index } => {
                departed(items, removed).map(|items| CollectionChange::Remove { items, index: *index })
            }
            CollectionChange::Replace {
                new_items,
                old_items,
                index,
            } => self.current(new_items, *index).and_then(|new_items| {
                departed(old_items, removed).map(|old_items| CollectionChange::Replace {
                    new_items,
                    old_items,
                    index: *index,
                })
            }),
            CollectionChange::Move {
                items,
                new_index,
                old_index,
            } => self.current(items, *new_index).map(|items| CollectionChange::Move {
                items,
                new_index: *new_index,
                old_index: *old_index,
            }),
            CollectionChange::Reset => None,
        };
        translated.unwrap_or(CollectionChange::Reset)
    }

    /// Derived elements at `index..` whose sources are exactly `items`
    fn current(&self, items: &[S], index: usize) -> Option<Vec<D>> {
        let state = self.state.borrow();
        let window = state.pairs.get(index..index.checked_add(items.len())?)?;
        window
            .iter()
            .zip(items)
            .map(|(pair, item)| (pair.source.identity() == item.identity()).then(|| pair.derived.clone()))
            .collect()
    }
}

/// Derived elements of `items` among the removed pairs, in order
fn departed<S: Identity, D: Clone>(items: &[S], removed: &[IdentityPair<S, D>]) -> Option<Vec<D>> {
    let mut taken = vec![false; removed.len()];
    items
        .iter()
        .map(|item| {
            let k = (0..removed.len())
                .find(|&k| !taken[k] && removed[k].source.identity() == item.identity())?;
            taken[k] = true;
            Some(removed[k].derived.clone())
        })
        .collect()
}

impl<S, D> NotifyingSequence<D> for ImitableCollection<S, D>
where
    S: Identity + Clone + 'static,
    D: Clone + 'static,
{
    fn snapshot(&self) -> Vec<D> {
        self.inner.derived()
    }

    fn observe(&self, callback: Box<dyn Fn(&CollectionChange<D>)>) -> Subscription {
        self.inner.notifier.subscribe(callback)
    }
}
