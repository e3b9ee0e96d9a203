//! Multi-source concatenating mirror
//!
//! Sources are kept in an ordered registry. Whenever a notifying source
//! changes (or the registry itself changes) the concatenation of all
//! sources is recomputed and the merged list is aligned to it, so the
//! merged list only sees the edits needed to catch up.
//!
//! Changes raised while an alignment is running (for example by a
//! subscriber of the merged list) mark the mirror dirty and are picked
//! up by the running alignment loop instead of nesting.
//!
//! Author: Moroya Sakamoto

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::align::align_by;
use crate::error::{Result, TreeError};
use crate::observable::{CollectionChange, NotifyingSequence, ObservableList, Subscription};

/// One input of a [`CombinableCollection`]
pub enum SourceSequence<T> {
    /// Observed; changes propagate immediately
    Notifying(Rc<dyn NotifyingSequence<T>>),
    /// Constant contents
    Fixed(Vec<T>),
    /// Read on every recombination; changes propagate on the next one
    Polled(Rc<dyn Fn() -> Vec<T>>),
}

impl<T> Clone for SourceSequence<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            SourceSequence::Notifying(source) => SourceSequence::Notifying(Rc::clone(source)),
            SourceSequence::Fixed(items) => SourceSequence::Fixed(items.clone()),
            SourceSequence::Polled(poll) => SourceSequence::Polled(Rc::clone(poll)),
        }
    }
}

impl<T> fmt::Debug for SourceSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            SourceSequence::Notifying(_) => "notifying",
            SourceSequence::Fixed(_) => "fixed",
            SourceSequence::Polled(_) => "polled",
        };
        f.debug_tuple("SourceSequence").field(&kind).finish()
    }
}

impl<T: Clone + 'static> SourceSequence<T> {
    pub fn notifying(source: impl NotifyingSequence<T> + 'static) -> Self {
        SourceSequence::Notifying(Rc::new(source))
    }

    pub fn polled(poll: impl Fn() -> Vec<T> + 'static) -> Self {
        SourceSequence::Polled(Rc::new(poll))
    }

    pub fn snapshot(&self) -> Vec<T> {
        match self {
            SourceSequence::Notifying(source) => source.snapshot(),
            SourceSequence::Fixed(items) => items.clone(),
            SourceSequence::Polled(poll) => poll(),
        }
    }
}

struct SourceEntry<T> {
    source: SourceSequence<T>,
    _subscription: Option<Subscription>,
}

struct CombinableInner<T> {
    sources: RefCell<Vec<SourceEntry<T>>>,
    merged: ObservableList<T>,
    equality: Box<dyn Fn(&T, &T) -> bool>,
    syncing: Cell<bool>,
    dirty: Cell<bool>,
    disposed: Cell<bool>,
}

/// Concatenation of several sources. Clones share the mirror.
pub struct CombinableCollection<T> {
    inner: Rc<CombinableInner<T>>,
}

impl<T> Clone for CombinableCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CombinableCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinableCollection")
            .field("sources", &self.inner.sources.borrow().len())
            .field("merged", &self.inner.merged)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Default for CombinableCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> CombinableCollection<T> {
    /// Empty mirror aligning with `==`
    pub fn new() -> Self {
        Self::with_equality(|a: &T, b: &T| a == b)
    }
}

impl<T: Clone + 'static> CombinableCollection<T> {
    /// Empty mirror aligning with `equality`
    pub fn with_equality(equality: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(CombinableInner {
                sources: RefCell::new(Vec::new()),
                merged: ObservableList::new(),
                equality: Box::new(equality),
                syncing: Cell::new(false),
                dirty: Cell::new(false),
                disposed: Cell::new(false),
            }),
        }
    }

    pub fn push_source(&self, source: SourceSequence<T>) -> Result<()> {
        let index = self.source_count();
        self.insert_source(index, source)
    }

    pub fn insert_source(&self, index: usize, source: SourceSequence<T>) -> Result<()> {
        self.ensure_alive()?;
        let count = self.source_count();
        if index > count {
            return Err(TreeError::out_of_range(index, count));
        }
        let subscription = match &source {
            SourceSequence::Notifying(notifying) => {
                let weak: Weak<CombinableInner<T>> = Rc::downgrade(&self.inner);
                Some(notifying.observe(Box::new(move |_: &CollectionChange<T>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.sync();
                    }
                })))
            }
            SourceSequence::Fixed(_) | SourceSequence::Polled(_) => None,
        };
        self.inner.sources.borrow_mut().insert(
            index,
            SourceEntry {
                source,
                _subscription: subscription,
            },
        );
        self.inner.sync();
        Ok(())
    }

    /// Remove and return the source at `index`; its elements leave the
    /// merged list.
    pub fn remove_source(&self, index: usize) -> Result<SourceSequence<T>> {
        self.ensure_alive()?;
        let entry = {
            let mut sources = self.inner.sources.borrow_mut();
            if index >= sources.len() {
                return Err(TreeError::out_of_range(index, sources.len()));
            }
            sources.remove(index)
        };
        self.inner.sync();
        Ok(entry.source)
    }

    pub fn source_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }

    /// Recombine now; picks up changes in polled sources.
    pub fn refresh(&self) -> Result<()> {
        self.ensure_alive()?;
        self.inner.sync();
        Ok(())
    }

    /// Handle to the merged list. Treat it as read-only: the next
    /// recombination overwrites direct edits.
    pub fn merged(&self) -> ObservableList<T> {
        self.inner.merged.clone()
    }

    pub fn items(&self) -> Result<Vec<T>> {
        self.ensure_alive()?;
        Ok(self.inner.merged.to_vec())
    }

    pub fn len(&self) -> usize {
        self.inner.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.merged.is_empty()
    }

    pub fn subscribe(&self, callback: impl Fn(&CollectionChange<T>) + 'static) -> Subscription {
        self.inner.merged.subscribe(callback)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Drop every source subscription. The merged list keeps its last
    /// contents.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let released = std::mem::take(&mut *self.inner.sources.borrow_mut());
        debug!(sources = released.len(), "combinable collection disposed");
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            Err(TreeError::UseAfterDispose {
                object: "combinable collection",
            })
        } else {
            Ok(())
        }
    }
}

impl<T: Clone + 'static> CombinableInner<T> {
    fn sync(&self) {
        if self.disposed.get() {
            return;
        }
        self.dirty.set(true);
        if self.syncing.replace(true) {
            return;
        }
        while self.dirty.replace(false) {
            let sources: Vec<SourceSequence<T>> = self
                .sources
                .borrow()
                .iter()
                .map(|entry| entry.source.clone())
                .collect();
            let target: Vec<T> = sources.iter().flat_map(SourceSequence::snapshot).collect();
            let report = align_by(&mut self.merged.clone(), &target, |a, b| (self.equality)(a, b));
            debug!(
                sources = sources.len(),
                len = target.len(),
                edits = report.total(),
                "sources recombined"
            );
        }
        self.syncing.set(false);
    }
}

impl<T: Clone + 'static> NotifyingSequence<T> for CombinableCollection<T> {
    fn snapshot(&self) -> Vec<T> {
        self.inner.merged.to_vec()
    }

    fn observe(&self, callback: Box<dyn Fn(&CollectionChange<T>)>) -> Subscription {
        self.inner.merged.subscribe(callback)
    }
}
