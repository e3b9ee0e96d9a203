//! Structure change engine
//!
//! Each notifying node owns a [`ChangeTracker`]: a private scheduler with
//! one key whose action dispatches structure events for that node. The
//! outermost scope captures a [`ChangeRecord`]; when it closes the record
//! is compared against the node's current position and, if the node
//! moved, three tables are built and joined:
//!
//! | Table | Audience | Payload |
//! |-------|----------|---------|
//! | structure | old and/or current tree, level-order | `Join` / `Deviate` / `Move` |
//! | descendant | old and new ancestor chains | [`DescendantInfo`] |
//! | ancestor | the moved subtree, level-order | [`AncestorInfo`] |
//!
//! Every node that appears in any table receives exactly one event.
//!
//! Author: Moroya Sakamoto

use std::cell::RefCell;
use std::rc::Weak;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::event::{AncestorInfo, DescendantInfo, StructureAction, StructureChangedEvent};
use crate::node::{NodeInner, TreeNode, PARENT_PROPERTY};
use crate::scheduler::{OpKey, OperationScheduler, ScheduleScope};

pub(crate) const STRUCTURE_KEY: &str = "structure";

/// Position of a node at the start of a logical edit
pub struct ChangeRecord<T> {
    old_parent: Option<TreeNode<T>>,
    old_index: Option<usize>,
    /// Parent first, root last
    old_ancestors: Vec<TreeNode<T>>,
}

impl<T> ChangeRecord<T> {
    pub fn capture(node: &TreeNode<T>) -> Self {
        Self {
            old_parent: node.parent(),
            old_index: node.branch_index(),
            old_ancestors: node.upstream().collect(),
        }
    }

    pub fn old_parent(&self) -> Option<&TreeNode<T>> {
        self.old_parent.as_ref()
    }

    pub fn old_index(&self) -> Option<usize> {
        self.old_index
    }

    pub fn old_ancestors(&self) -> &[TreeNode<T>] {
        &self.old_ancestors
    }

    /// The root the node hung under when the record was taken
    pub fn old_root(&self, node: &TreeNode<T>) -> TreeNode<T> {
        self.old_ancestors
            .last()
            .cloned()
            .unwrap_or_else(|| node.clone())
    }

    /// New parent differs, or same parent at a different position.
    pub fn is_changed(&self, node: &TreeNode<T>) -> bool {
        let new_parent = node.parent();
        if !same_node(new_parent.as_ref(), self.old_parent.as_ref()) {
            return true;
        }
        new_parent.is_some() && node.branch_index() != self.old_index
    }
}

fn same_node<T>(a: Option<&TreeNode<T>>, b: Option<&TreeNode<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

pub(crate) struct ChangeTracker<T> {
    scheduler: OperationScheduler,
    record: RefCell<Option<ChangeRecord<T>>>,
}

impl<T: 'static> ChangeTracker<T> {
    pub(crate) fn new(node: Weak<NodeInner<T>>) -> Self {
        let scheduler = OperationScheduler::with_operation(STRUCTURE_KEY, move || {
            if let Some(inner) = node.upgrade() {
                dispatch(&TreeNode::from_inner(inner));
            }
        });
        Self {
            scheduler,
            record: RefCell::new(None),
        }
    }

    pub(crate) fn open_scope(&self, node: &TreeNode<T>) -> Option<ScheduleScope> {
        let key = OpKey::from(STRUCTURE_KEY);
        if self.scheduler.depth(&key) == Some(0) {
            *self.record.borrow_mut() = Some(ChangeRecord::capture(node));
        }
        match self.scheduler.execute_unique(key) {
            Ok(scope) => Some(scope),
            Err(err) => {
                warn!(node = node.id(), %err, "structure scope unavailable");
                None
            }
        }
    }

    fn take_record(&self) -> Option<ChangeRecord<T>> {
        self.record.borrow_mut().take()
    }
}

/// Build the per-node events for `node`, which moved since `record`.
pub fn compute_events<T>(
    node: &TreeNode<T>,
    record: &ChangeRecord<T>,
) -> Vec<(TreeNode<T>, StructureChangedEvent<T>)> {
    let current_root = node.root();
    let old_root = record.old_root(node);
    let same_tree = old_root.ptr_eq(&current_root);
    let mut table = EventTable::default();

    // Structure
    if same_tree {
        for n in current_root.level_order() {
            table.entry(&n).action = Some(StructureAction::Move);
        }
    } else {
        if record.old_parent.is_some() {
            for n in old_root.level_order() {
                table.entry(&n).action = Some(StructureAction::Deviate);
            }
        }
        let (audience, action) = if node.parent().is_some() {
            (current_root, StructureAction::Join)
        } else {
            (node.clone(), StructureAction::Deviate)
        };
        for n in audience.level_order() {
            table.entry(&n).action = Some(action);
        }
    }

    // Descendant
    let new_ancestors: Vec<TreeNode<T>> = node.upstream().collect();
    let descendant_info = |node_action| DescendantInfo {
        target: node.clone(),
        node_action,
        old_index: record.old_index,
        previous_parent: record.old_parent.clone(),
    };
    if same_tree {
        let old_ids: FxHashSet<usize> = record.old_ancestors.iter().map(TreeNode::id).collect();
        let new_ids: FxHashSet<usize> = new_ancestors.iter().map(TreeNode::id).collect();
        for n in &record.old_ancestors {
            let action = if new_ids.contains(&n.id()) {
                StructureAction::Move
            } else {
                StructureAction::Deviate
            };
            table.entry(n).descendant = Some(descendant_info(action));
        }
        for n in new_ancestors.iter().filter(|n| !old_ids.contains(&n.id())) {
            table.entry(n).descendant = Some(descendant_info(StructureAction::Join));
        }
    } else {
        for n in &record.old_ancestors {
            table.entry(n).descendant = Some(descendant_info(StructureAction::Deviate));
        }
        for n in &new_ancestors {
            table.entry(n).descendant = Some(descendant_info(StructureAction::Join));
        }
    }

    // Ancestor
    let ancestor_info = AncestorInfo {
        moved_target: node.clone(),
        old_index: record.old_index,
        previous_parent: record.old_parent.clone(),
        root_was_changed: !same_tree,
    };
    for n in node.level_order() {
        table.entry(&n).ancestor = Some(ancestor_info.clone());
    }

    table.into_events(node, record)
}

struct Pending<T> {
    action: Option<StructureAction>,
    ancestor: Option<AncestorInfo<T>>,
    descendant: Option<DescendantInfo<T>>,
}

/// Insertion-ordered join of the three tables
struct EventTable<T> {
    rows: Vec<(TreeNode<T>, Pending<T>)>,
    index: FxHashMap<usize, usize>,
}

impl<T> Default for EventTable<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T> EventTable<T> {
    fn entry(&mut self, node: &TreeNode<T>) -> &mut Pending<T> {
        let next = self.rows.len();
        let slot = *self.index.entry(node.id()).or_insert(next);
        if slot == next {
            self.rows.push((
                node.clone(),
                Pending {
                    action: None,
                    ancestor: None,
                    descendant: None,
                },
            ));
        }
        &mut self.rows[slot].1
    }

    fn into_events(
        self,
        target: &TreeNode<T>,
        record: &ChangeRecord<T>,
    ) -> Vec<(TreeNode<T>, StructureChangedEvent<T>)> {
        self.rows
            .into_iter()
            .map(|(node, pending)| {
                let action = pending
                    .action
                    .or_else(|| pending.descendant.as_ref().map(|d| d.node_action))
                    .unwrap_or(StructureAction::Move);
                let event = StructureChangedEvent {
                    action,
                    target: target.clone(),
                    previous_parent: record.old_parent.clone(),
                    previous_index: record.old_index,
                    ancestor_info: pending.ancestor,
                    descendant_info: pending.descendant,
                };
                (node, event)
            })
            .collect()
    }
}

/// Close-of-scope action: deliver events if the node actually moved.
fn dispatch<T: 'static>(node: &TreeNode<T>) {
    let Some(record) = node
        .inner
        .tracker
        .as_ref()
        .and_then(ChangeTracker::take_record)
    else {
        return;
    };
    if !record.is_changed(node) {
        trace!(node = node.id(), "edit left node in place");
        return;
    }
    let parent_changed = !same_node(node.parent().as_ref(), record.old_parent.as_ref());
    let events = compute_events(node, &record);
    debug!(
        node = node.id(),
        affected = events.len(),
        parent_changed,
        "dispatching structure events"
    );
    for (receiver, event) in &events {
        if receiver.config().notify && !receiver.is_disposed() {
            receiver.inner.structure_signal.notify(event);
        }
    }
    if parent_changed {
        node.notify_property(PARENT_PROPERTY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::observable::Subscription;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(char, StructureChangedEvent<char>)>>>;

    fn record_all(nodes: &[&TreeNode<char>]) -> (Log, Vec<Subscription>) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let subs = nodes
            .iter()
            .map(|n| {
                let sink = Rc::clone(&log);
                let name = n.value();
                n.subscribe_structure_changed(move |e| sink.borrow_mut().push((name, e.clone())))
            })
            .collect();
        (log, subs)
    }

    fn event_for(log: &Log, name: char) -> StructureChangedEvent<char> {
        let log = log.borrow();
        let hits: Vec<_> = log.iter().filter(|(n, _)| *n == name).collect();
        assert_eq!(hits.len(), 1, "node {name} should get exactly one event");
        hits[0].1.clone()
    }

    //   A
    //  / \
    // B   C
    //     |
    //     D
    fn sample() -> [TreeNode<char>; 4] {
        let [a, b, c, d] = ['A', 'B', 'C', 'D'].map(TreeNode::new);
        a.add_child(&b).unwrap();
        a.add_child(&c).unwrap();
        c.add_child(&d).unwrap();
        [a, b, c, d]
    }

    #[test]
    fn test_move_within_tree() {
        let [a, b, c, d] = sample();
        let (log, _subs) = record_all(&[&a, &b, &c, &d]);

        assert!(b.insert_child(0, &d).unwrap());
        assert_eq!(log.borrow().len(), 4);

        for name in ['A', 'B', 'C', 'D'] {
            let e = event_for(&log, name);
            assert_eq!(e.action, StructureAction::Move);
            assert!(e.target.ptr_eq(&d));
            assert!(e.previous_parent.as_ref().is_some_and(|p| p.ptr_eq(&c)));
            assert_eq!(e.previous_index, Some(0));
        }
        let info = |name| event_for(&log, name).descendant_info.map(|d| d.node_action);
        assert_eq!(info('B'), Some(StructureAction::Join));
        assert_eq!(info('C'), Some(StructureAction::Deviate));
        assert_eq!(info('A'), Some(StructureAction::Move));
        assert_eq!(info('D'), None);

        let ancestor = event_for(&log, 'D').ancestor_info.unwrap();
        assert!(!ancestor.root_was_changed);
        assert!(ancestor.moved_target.ptr_eq(&d));
        assert!(event_for(&log, 'A').ancestor_info.is_none());
    }

    #[test]
    fn test_join_from_detached() {
        let [a, b, ..] = sample();
        let x = TreeNode::new('X');
        let y = TreeNode::new('Y');
        x.add_child(&y).unwrap();
        let (log, _subs) = record_all(&[&a, &b, &x, &y]);

        b.add_child(&x).unwrap();
        assert_eq!(event_for(&log, 'A').action, StructureAction::Join);
        assert_eq!(event_for(&log, 'X').action, StructureAction::Join);
        let y_event = event_for(&log, 'Y');
        assert!(y_event.root_was_changed());
        assert!(y_event.previous_parent.is_none());
        assert_eq!(
            event_for(&log, 'B').descendant_info.map(|d| d.node_action),
            Some(StructureAction::Join)
        );
    }

    #[test]
    fn test_detach_deviates_both_sides() {
        let [a, b, c, d] = sample();
        let (log, _subs) = record_all(&[&a, &b, &c, &d]);
        c.detach().unwrap();
        for name in ['A', 'B', 'C', 'D'] {
            assert_eq!(event_for(&log, name).action, StructureAction::Deviate);
        }
        assert_eq!(
            event_for(&log, 'A').descendant_info.map(|d| d.node_action),
            Some(StructureAction::Deviate)
        );
        assert!(event_for(&log, 'D').root_was_changed());
    }

    #[test]
    fn test_move_between_trees() {
        let [a, _b, c, d] = sample();
        let other = TreeNode::new('O');
        let (log, _subs) = record_all(&[&a, &c, &d, &other]);
        other.add_child(&d).unwrap();
        assert_eq!(event_for(&log, 'A').action, StructureAction::Deviate);
        assert_eq!(event_for(&log, 'C').action, StructureAction::Deviate);
        assert_eq!(event_for(&log, 'O').action, StructureAction::Join);
        // The moved node is in the new tree: Join wins.
        assert_eq!(event_for(&log, 'D').action, StructureAction::Join);

        // Deviate to the whole old chain, Join to the whole new one
        let descendant = |v| event_for(&log, v).descendant_info.map(|d| d.node_action);
        assert_eq!(descendant('C'), Some(StructureAction::Deviate));
        assert_eq!(descendant('A'), Some(StructureAction::Deviate));
        assert_eq!(descendant('O'), Some(StructureAction::Join));
        assert!(event_for(&log, 'D').descendant_info.is_none());
    }

    #[test]
    fn test_noop_edit_is_silent() {
        let [a, b, c, d] = sample();
        let (log, _subs) = record_all(&[&a, &b, &c, &d]);
        assert!(!c.insert_child(0, &d).unwrap());
        assert!(!a.shift_child(1, 1).unwrap());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_remove_and_reinsert_in_one_scope_is_silent() {
        let [a, b, c, d] = sample();
        let (log, _subs) = record_all(&[&a, &b, &c, &d]);
        {
            let _edit = d.late_evaluate_tree();
            c.remove_child(&d).unwrap();
            c.insert_child(0, &d).unwrap();
        }
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_grouped_edit_reports_once() {
        let [a, b, c, d] = sample();
        let (log, _subs) = record_all(&[&a, &b, &c, &d]);
        {
            let _edit = d.late_evaluate_tree();
            d.detach().unwrap();
            b.add_child(&d).unwrap();
            assert!(log.borrow().is_empty());
        }
        assert_eq!(event_for(&log, 'D').action, StructureAction::Move);
    }

    #[test]
    fn test_shift_notifies_moved_child_only() {
        let [a, b, c, _d] = sample();
        let (log, _subs) = record_all(&[&a, &b, &c]);
        a.shift_child(0, 1).unwrap();
        let e = event_for(&log, 'A');
        assert!(e.target.ptr_eq(&b));
        assert_eq!(e.previous_index, Some(0));
        assert!(log.borrow().iter().all(|(_, e)| e.target.ptr_eq(&b)));
    }

    #[test]
    fn test_parent_property_signal() {
        let [_a, b, _c, d] = sample();
        let names = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&names);
        let _sub = d.subscribe_property_changed(move |n| sink.borrow_mut().push(n.to_owned()));
        b.add_child(&d).unwrap();
        assert_eq!(*names.borrow(), vec![String::from(PARENT_PROPERTY)]);
    }

    #[test]
    fn test_silent_nodes_do_not_receive() {
        let root = TreeNode::new('R');
        let quiet = TreeNode::with_config('Q', NodeConfig::new().silent());
        let (log, _subs) = record_all(&[&root, &quiet]);
        let leaf = TreeNode::new('L');
        root.add_child(&quiet).unwrap();
        quiet.add_child(&leaf).unwrap();
        assert!(log.borrow().iter().all(|(n, _)| *n == 'R'));
    }

    #[test]
    fn test_handler_edit_is_processed_before_return() {
        let [_a, b, c, d] = sample();
        let b_handle = b.clone();
        let c_handle = c.clone();
        let _sub = d.subscribe_structure_changed(move |e| {
            if e.target.value() == 'D' && b_handle.child_count() > 0 {
                // Bounce D back where it came from.
                let d = e.target.clone();
                c_handle.add_child(&d).unwrap();
            }
        });
        b.add_child(&d).unwrap();
        assert!(d.parent_is(&c));
        assert_eq!(b.child_count(), 0);
    }

    #[test]
    fn test_record_capture() {
        let [a, _b, c, d] = sample();
        let record = ChangeRecord::capture(&d);
        assert!(record.old_parent().is_some_and(|p| p.ptr_eq(&c)));
        assert_eq!(record.old_index(), Some(0));
        assert_eq!(record.old_ancestors().len(), 2);
        assert!(record.old_root(&d).ptr_eq(&a));
        assert!(!record.is_changed(&d));
        d.detach().unwrap();
        assert!(record.is_changed(&d));
    }
}
