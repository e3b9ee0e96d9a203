//! Tree node and mutation primitives
//!
//! A [`TreeNode`] is a shared handle: clones point at the same node and
//! equality is identity. Parents own their children; the parent
//! back-reference is weak, so dropping the last handle to a root frees
//! the whole tree.
//!
//! Every structural edit goes through one of the primitives below. Each
//! primitive:
//!
//! 1. validates (a rejected edit is `Ok(false)`, nothing changes),
//! 2. opens a structure scope on every child it touches,
//! 3. detaches the incoming child from its previous parent,
//! 4. runs the low-level storage operation (pluggable via `*_with`),
//! 5. repairs parent pointers from a before/after diff of the children,
//!    on failure too, then propagates the error,
//! 6. emits the child-collection change.
//!
//! Structure events fire when the outermost scope closes, so an edit
//! made of several primitives reports once.
//!
//! Author: Moroya Sakamoto

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashSet;
use tracing::{debug, error, warn};

use crate::config::NodeConfig;
use crate::engine::ChangeTracker;
use crate::error::{Result, TreeError};
use crate::event::StructureChangedEvent;
use crate::observable::{CollectionChange, Notifier, NotifyingSequence, Subscription};
use crate::scheduler::ScheduleScope;
use crate::storage::ChildStorage;

/// Property name signalled when a dispatched edit changed the parent
pub const PARENT_PROPERTY: &str = "Parent";
/// Property name signalled once on dispose
pub const DISPOSED_PROPERTY: &str = "Disposed";

pub(crate) struct NodeInner<T> {
    value: RefCell<T>,
    parent: RefCell<Weak<NodeInner<T>>>,
    children: RefCell<ChildStorage<T>>,
    config: NodeConfig,
    disposed: Cell<bool>,
    pub(crate) structure_signal: Notifier<StructureChangedEvent<T>>,
    children_signal: Notifier<CollectionChange<TreeNode<T>>>,
    property_signal: Notifier<str>,
    /// Present on notifying nodes only
    pub(crate) tracker: Option<ChangeTracker<T>>,
}

/// Handle to a tree node
pub struct TreeNode<T> {
    pub(crate) inner: Rc<NodeInner<T>>,
}

impl<T> Clone for TreeNode<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for TreeNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for TreeNode<T> {}

impl<T> Hash for TreeNode<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for TreeNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("TreeNode");
        out.field("id", &self.id());
        match self.inner.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.finish_non_exhaustive()
    }
}

impl<T> TreeNode<T> {
    pub(crate) fn from_inner(inner: Rc<NodeInner<T>>) -> Self {
        Self { inner }
    }

    /// Same node?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address-based identity, stable for the node's lifetime
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn parent(&self) -> Option<TreeNode<T>> {
        self.inner.parent.borrow().upgrade().map(TreeNode::from_inner)
    }

    pub(crate) fn parent_is(&self, node: &TreeNode<T>) -> bool {
        self.parent().is_some_and(|p| p.ptr_eq(node))
    }

    fn set_parent_pointer(&self, parent: Option<&TreeNode<T>>) {
        *self.inner.parent.borrow_mut() = parent.map_or_else(Weak::new, |p| Rc::downgrade(&p.inner));
    }

    /// Live children in position order
    pub fn children(&self) -> Vec<TreeNode<T>> {
        self.inner.children.borrow().iter().cloned().collect()
    }

    pub fn child_at(&self, index: usize) -> Option<TreeNode<T>> {
        self.inner.children.borrow().get(index).cloned()
    }

    /// Number of live children
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().occupied()
    }

    /// Number of positions: list length, or arity for fixed storage
    pub fn slot_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    pub fn contains_child(&self, node: &TreeNode<T>) -> bool {
        self.inner.children.borrow().contains(node)
    }

    /// Position under the parent
    pub fn branch_index(&self) -> Option<usize> {
        self.parent()
            .and_then(|p| p.inner.children.borrow().position(self))
    }

    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn with_value_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.value.borrow_mut())
    }

    pub fn value(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Replace the value, returning the old one.
    pub fn set_value(&self, value: T) -> T {
        std::mem::replace(&mut *self.inner.value.borrow_mut(), value)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            Err(TreeError::UseAfterDispose { object: "node" })
        } else {
            Ok(())
        }
    }
}

impl<T: 'static> TreeNode<T> {
    /// Detached, notifying node with list storage
    pub fn new(value: T) -> Self {
        Self::with_config(value, NodeConfig::default())
    }

    pub fn with_config(value: T, config: NodeConfig) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<NodeInner<T>>| NodeInner {
            value: RefCell::new(value),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(ChildStorage::for_kind(config.storage)),
            tracker: config.notify.then(|| ChangeTracker::new(weak.clone())),
            config,
            disposed: Cell::new(false),
            structure_signal: Notifier::new(),
            children_signal: Notifier::new(),
            property_signal: Notifier::new(),
        });
        Self { inner }
    }

    // ── Subscriptions ──

    /// Structure events delivered to this node
    pub fn subscribe_structure_changed(
        &self,
        callback: impl Fn(&StructureChangedEvent<T>) + 'static,
    ) -> Subscription {
        self.inner.structure_signal.subscribe(callback)
    }

    /// Changes to this node's child collection
    pub fn subscribe_children_changed(
        &self,
        callback: impl Fn(&CollectionChange<TreeNode<T>>) + 'static,
    ) -> Subscription {
        self.inner.children_signal.subscribe(callback)
    }

    /// Name-only property signal: [`PARENT_PROPERTY`] or [`DISPOSED_PROPERTY`]
    pub fn subscribe_property_changed(&self, callback: impl Fn(&str) + 'static) -> Subscription {
        self.inner.property_signal.subscribe(callback)
    }

    pub(crate) fn notify_property(&self, name: &str) {
        self.inner.property_signal.notify(name);
    }

    /// Open a structure scope on this node.
    ///
    /// Every primitive opens one for the children it moves; holding one
    /// yourself groups several primitives into one logical edit that
    /// reports (at most) once when the outermost scope drops. `None` for
    /// silent nodes.
    pub fn late_evaluate_tree(&self) -> Option<ScheduleScope> {
        self.inner
            .tracker
            .as_ref()
            .and_then(|tracker| tracker.open_scope(self))
    }

    // ── Validation ──

    /// Whether `child` may be attached under this node.
    ///
    /// `None` is always permitted. Self and ancestors are rejected (the
    /// edit would create a cycle), as is a child already listed here with
    /// a matching parent pointer. A membership/pointer disagreement is
    /// logged and permitted; the edit's repair pass fixes it.
    pub fn can_attach(&self, child: Option<&TreeNode<T>>) -> bool {
        let Some(child) = child else {
            return true;
        };
        if child.ptr_eq(self) || self.upstream().any(|a| a.ptr_eq(child)) {
            return false;
        }
        let listed = self.contains_child(child);
        let parented = child.parent_is(self);
        match (listed, parented) {
            (true, true) => false,
            (false, false) => true,
            (listed, parented) => {
                error!(
                    parent = self.id(),
                    child = child.id(),
                    listed,
                    parented,
                    "parent/child membership disagrees"
                );
                true
            }
        }
    }

    // ── Primitives ──

    pub fn insert_child(&self, index: usize, child: &TreeNode<T>) -> Result<bool> {
        self.insert_child_with(index, child, ChildStorage::insert)
    }

    /// [`insert_child`](Self::insert_child) with a caller-supplied storage
    /// operation. The operation must not touch the tree.
    pub fn insert_child_with(
        &self,
        index: usize,
        child: &TreeNode<T>,
        op: impl FnOnce(&mut ChildStorage<T>, usize, TreeNode<T>) -> Result<()>,
    ) -> Result<bool> {
        self.ensure_alive()?;
        child.ensure_alive()?;
        if !self.can_attach(Some(child)) {
            return Ok(false);
        }
        let _scope = child.late_evaluate_tree();
        child.detach_from_parent()?;
        let incoming = child.clone();
        self.mutate(|storage| op(storage, index, incoming))?;

        let position = self.inner.children.borrow().position(child);
        self.emit_children_changed(match position {
            Some(index) => CollectionChange::Add {
                items: vec![child.clone()],
                index,
            },
            None => CollectionChange::Reset,
        });
        Ok(true)
    }

    /// Place `child` at `index`, or empty the slot with `None`.
    pub fn set_child(&self, index: usize, child: Option<&TreeNode<T>>) -> Result<bool> {
        self.set_child_with(index, child, ChildStorage::set)
    }

    pub fn set_child_with(
        &self,
        index: usize,
        child: Option<&TreeNode<T>>,
        op: impl FnOnce(&mut ChildStorage<T>, usize, Option<TreeNode<T>>) -> Result<Option<TreeNode<T>>>,
    ) -> Result<bool> {
        self.ensure_alive()?;
        if let Some(child) = child {
            child.ensure_alive()?;
        }
        if !self.can_attach(child) {
            return Ok(false);
        }
        let previous = self.child_at(index);
        if previous.is_none() && child.is_none() {
            return Ok(false);
        }

        let _scopes = [
            previous.as_ref().and_then(TreeNode::late_evaluate_tree),
            child.and_then(TreeNode::late_evaluate_tree),
        ];
        if let Some(child) = child {
            child.detach_from_parent()?;
        }
        let incoming = child.cloned();
        let replaced = self.mutate(|storage| op(storage, index, incoming))?;

        let change = match (child, replaced) {
            (Some(new), Some(old)) => CollectionChange::Replace {
                new_items: vec![new.clone()],
                old_items: vec![old],
                index,
            },
            (Some(new), None) => CollectionChange::Add {
                items: vec![new.clone()],
                index,
            },
            (None, Some(old)) => CollectionChange::Remove {
                items: vec![old],
                index,
            },
            (None, None) => CollectionChange::Reset,
        };
        self.emit_children_changed(change);
        Ok(true)
    }

    /// Remove `child`. A node that is not a child is a no-op.
    pub fn remove_child(&self, child: &TreeNode<T>) -> Result<bool> {
        self.remove_child_with(child, ChildStorage::remove)
    }

    pub fn remove_child_with(
        &self,
        child: &TreeNode<T>,
        op: impl FnOnce(&mut ChildStorage<T>, &TreeNode<T>) -> Result<Option<usize>>,
    ) -> Result<bool> {
        self.ensure_alive()?;
        if !self.contains_child(child) {
            return Ok(false);
        }
        let _scope = child.late_evaluate_tree();
        let removed_at = self.mutate(|storage| op(storage, child))?;

        self.emit_children_changed(match removed_at {
            Some(index) => CollectionChange::Remove {
                items: vec![child.clone()],
                index,
            },
            None => CollectionChange::Reset,
        });
        Ok(true)
    }

    pub fn clear_children(&self) -> Result<bool> {
        self.clear_children_with(ChildStorage::clear)
    }

    pub fn clear_children_with(
        &self,
        op: impl FnOnce(&mut ChildStorage<T>) -> Result<()>,
    ) -> Result<bool> {
        self.ensure_alive()?;
        let children = self.children();
        if children.is_empty() {
            return Ok(false);
        }
        let _scopes: Vec<_> = children.iter().map(TreeNode::late_evaluate_tree).collect();
        self.mutate(op)?;
        self.emit_children_changed(CollectionChange::Reset);
        Ok(true)
    }

    /// Move the entry at `old_index` to `new_index`. Only the moved child
    /// is notified; siblings whose position shifted are not.
    pub fn shift_child(&self, old_index: usize, new_index: usize) -> Result<bool> {
        self.shift_child_with(old_index, new_index, ChildStorage::shift)
    }

    pub fn shift_child_with(
        &self,
        old_index: usize,
        new_index: usize,
        op: impl FnOnce(&mut ChildStorage<T>, usize, usize) -> Result<()>,
    ) -> Result<bool> {
        self.ensure_alive()?;
        let slots = self.slot_count();
        if old_index == new_index || old_index >= slots || new_index >= slots {
            return Ok(false);
        }
        let moved = self.child_at(old_index);
        let _scope = moved.as_ref().and_then(TreeNode::late_evaluate_tree);
        self.mutate(|storage| op(storage, old_index, new_index))?;

        self.emit_children_changed(match moved {
            Some(node) => CollectionChange::Move {
                items: vec![node],
                new_index,
                old_index,
            },
            None => CollectionChange::Reset,
        });
        Ok(true)
    }

    /// Append `child`: at the end of a list, or into the first empty slot
    /// of fixed storage.
    pub fn add_child(&self, child: &TreeNode<T>) -> Result<bool> {
        let vacant = {
            let storage = self.inner.children.borrow();
            if storage.is_fixed() {
                Some(storage.first_vacant())
            } else {
                None
            }
        };
        match vacant {
            None => self.insert_child(self.slot_count(), child),
            Some(Some(slot)) => self.set_child(slot, Some(child)),
            Some(None) => Err(TreeError::unsupported("add", "fixed")),
        }
    }

    /// Remove this node from its parent.
    pub fn detach(&self) -> Result<bool> {
        match self.parent() {
            Some(parent) => parent.remove_child(self),
            None => Ok(false),
        }
    }

    /// Detach from the parent, then dispose descendants leaves first.
    /// Detach failures are logged and swallowed. Idempotent.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        if let Err(err) = self.detach() {
            warn!(node = self.id(), %err, "detach failed during dispose");
        }
        for node in self.post_order() {
            if node.ptr_eq(self) {
                continue;
            }
            if let Err(err) = node.detach() {
                warn!(node = node.id(), %err, "detach failed during dispose");
            }
            node.mark_disposed();
        }
        self.mark_disposed();
    }

    fn mark_disposed(&self) {
        if !self.inner.disposed.replace(true) {
            self.notify_property(DISPOSED_PROPERTY);
        }
    }

    // ── Internals ──

    /// Remove from the current parent and drop a stale back-reference.
    fn detach_from_parent(&self) -> Result<()> {
        let Some(parent) = self.parent() else {
            return Ok(());
        };
        parent.remove_child(self)?;
        if self.parent_is(&parent) {
            self.set_parent_pointer(None);
        }
        Ok(())
    }

    /// Run a storage operation, then bring parent pointers in line with
    /// the resulting children whether or not it succeeded.
    fn mutate<R>(&self, op: impl FnOnce(&mut ChildStorage<T>) -> Result<R>) -> Result<R> {
        let before = self.children();
        let result = op(&mut self.inner.children.borrow_mut());
        self.reconcile(&before);
        match result {
            Ok(value) => {
                self.verify();
                Ok(value)
            }
            Err(err) => {
                debug!(node = self.id(), %err, "repaired parent pointers after failed mutation");
                Err(err)
            }
        }
    }

    fn reconcile(&self, before: &[TreeNode<T>]) {
        let after = self.children();
        let present: FxHashSet<usize> = after.iter().map(TreeNode::id).collect();
        for node in before {
            if !present.contains(&node.id()) && node.parent_is(self) {
                node.set_parent_pointer(None);
            }
        }
        for node in &after {
            node.set_parent_pointer(Some(self));
        }
    }

    fn verify(&self) {
        if !self.inner.config.verify_consistency {
            return;
        }
        for child in self.children() {
            if !child.parent_is(self) {
                error!(parent = self.id(), child = child.id(), "child does not point back at its parent");
            }
        }
        if let Some(parent) = self.parent() {
            if !parent.contains_child(self) {
                error!(parent = parent.id(), child = self.id(), "parent does not list its child");
            }
        }
    }

    fn emit_children_changed(&self, change: CollectionChange<TreeNode<T>>) {
        if !self.inner.config.notify {
            return;
        }
        let change = if self.inner.children.borrow().is_fixed() {
            CollectionChange::Reset
        } else {
            change
        };
        self.inner.children_signal.notify(&change);
    }
}

impl<T: 'static> NotifyingSequence<TreeNode<T>> for TreeNode<T> {
    fn snapshot(&self) -> Vec<TreeNode<T>> {
        self.children()
    }

    fn observe(&self, callback: Box<dyn Fn(&CollectionChange<TreeNode<T>>)>) -> Subscription {
        self.inner.children_signal.subscribe(callback)
    }
}
