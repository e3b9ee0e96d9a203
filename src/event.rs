//! Structure change events
//!
//! One logical edit moves one node (the *target*). Every node affected by
//! that edit receives a single [`StructureChangedEvent`]:
//!
//! | Audience | Extra payload |
//! |----------|---------------|
//! | every node of the affected tree(s) | `action` |
//! | ancestors (old and new) of the target | [`DescendantInfo`] |
//! | the target and its descendants | [`AncestorInfo`] |
//!
//! Author: Moroya Sakamoto

use std::fmt;

use crate::node::TreeNode;

/// Kind of structural change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureAction {
    /// Entered a tree
    Join,
    /// Left a tree
    Deviate,
    /// Relocated within the same tree
    Move,
}

/// Delivered to the moved node and its descendants: an ancestor changed.
pub struct AncestorInfo<T> {
    pub moved_target: TreeNode<T>,
    pub old_index: Option<usize>,
    pub previous_parent: Option<TreeNode<T>>,
    /// The subtree now hangs under a different root
    pub root_was_changed: bool,
}

/// Delivered to ancestors of the moved node: a descendant changed.
pub struct DescendantInfo<T> {
    pub target: TreeNode<T>,
    /// How the descendant relates to this ancestor after the edit
    pub node_action: StructureAction,
    pub old_index: Option<usize>,
    pub previous_parent: Option<TreeNode<T>>,
}

/// The joined per-node notification for one logical edit.
pub struct StructureChangedEvent<T> {
    pub action: StructureAction,
    /// The node that was moved
    pub target: TreeNode<T>,
    pub previous_parent: Option<TreeNode<T>>,
    pub previous_index: Option<usize>,
    pub ancestor_info: Option<AncestorInfo<T>>,
    pub descendant_info: Option<DescendantInfo<T>>,
}

impl<T> StructureChangedEvent<T> {
    /// True when `node` is the moved node itself
    pub fn is_target(&self, node: &TreeNode<T>) -> bool {
        self.target.ptr_eq(node)
    }

    pub fn root_was_changed(&self) -> bool {
        self.ancestor_info
            .as_ref()
            .is_some_and(|info| info.root_was_changed)
    }
}

// Manual impls: the handles are cheap to clone whatever `T` is.

impl<T> Clone for AncestorInfo<T> {
    fn clone(&self) -> Self {
        Self {
            moved_target: self.moved_target.clone(),
            old_index: self.old_index,
            previous_parent: self.previous_parent.clone(),
            root_was_changed: self.root_was_changed,
        }
    }
}

impl<T> Clone for DescendantInfo<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            node_action: self.node_action,
            old_index: self.old_index,
            previous_parent: self.previous_parent.clone(),
        }
    }
}

impl<T> Clone for StructureChangedEvent<T> {
    fn clone(&self) -> Self {
        Self {
            action: self.action,
            target: self.target.clone(),
            previous_parent: self.previous_parent.clone(),
            previous_index: self.previous_index,
            ancestor_info: self.ancestor_info.clone(),
            descendant_info: self.descendant_info.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AncestorInfo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AncestorInfo")
            .field("moved_target", &self.moved_target)
            .field("old_index", &self.old_index)
            .field("root_was_changed", &self.root_was_changed)
            .finish_non_exhaustive()
    }
}

impl<T: fmt::Debug> fmt::Debug for DescendantInfo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescendantInfo")
            .field("target", &self.target)
            .field("node_action", &self.node_action)
            .field("old_index", &self.old_index)
            .finish_non_exhaustive()
    }
}

impl<T: fmt::Debug> fmt::Debug for StructureChangedEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureChangedEvent")
            .field("action", &self.action)
            .field("target", &self.target)
            .field("previous_parent", &self.previous_parent)
            .field("previous_index", &self.previous_index)
            .field("ancestor_info", &self.ancestor_info)
            .field("descendant_info", &self.descendant_info)
            .finish()
    }
}
