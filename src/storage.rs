//! Child storage strategies
//!
//! A node owns its children through a [`ChildStorage`]: either a growable
//! list or a fixed number of slots where empty slots act as placeholders.
//! The methods here are the natural low-level operations used by the
//! mutation primitives; callers may substitute their own through the
//! `*_with` primitives on [`TreeNode`](crate::TreeNode).
//!
//! Positions are always slot positions: for fixed storage `len()` is the
//! arity, not the number of occupied slots.
//!
//! Author: Moroya Sakamoto

use crate::config::StorageKind;
use crate::error::{Result, TreeError};
use crate::node::TreeNode;

#[derive(Debug)]
pub enum ChildStorage<T> {
    List(Vec<TreeNode<T>>),
    Fixed(Vec<Option<TreeNode<T>>>),
}

impl<T> ChildStorage<T> {
    pub fn for_kind(kind: StorageKind) -> Self {
        match kind {
            StorageKind::List => ChildStorage::List(Vec::new()),
            StorageKind::Fixed(arity) => ChildStorage::Fixed((0..arity).map(|_| None).collect()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ChildStorage::List(_) => "list",
            ChildStorage::Fixed(_) => "fixed",
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, ChildStorage::Fixed(_))
    }

    /// Number of positions (list length or arity)
    pub fn len(&self) -> usize {
        match self {
            ChildStorage::List(items) => items.len(),
            ChildStorage::Fixed(slots) => slots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live children
    pub fn occupied(&self) -> usize {
        self.iter().count()
    }

    pub fn get(&self, index: usize) -> Option<&TreeNode<T>> {
        match self {
            ChildStorage::List(items) => items.get(index),
            ChildStorage::Fixed(slots) => slots.get(index).and_then(Option::as_ref),
        }
    }

    /// Live children in position order
    pub fn iter(&self) -> Box<dyn Iterator<Item = &TreeNode<T>> + '_> {
        match self {
            ChildStorage::List(items) => Box::new(items.iter()),
            ChildStorage::Fixed(slots) => Box::new(slots.iter().flatten()),
        }
    }

    pub fn position(&self, node: &TreeNode<T>) -> Option<usize> {
        match self {
            ChildStorage::List(items) => items.iter().position(|c| c.ptr_eq(node)),
            ChildStorage::Fixed(slots) => slots
                .iter()
                .position(|slot| slot.as_ref().is_some_and(|c| c.ptr_eq(node))),
        }
    }

    pub fn contains(&self, node: &TreeNode<T>) -> bool {
        self.position(node).is_some()
    }

    /// First empty slot of fixed storage
    pub fn first_vacant(&self) -> Option<usize> {
        match self {
            ChildStorage::List(_) => None,
            ChildStorage::Fixed(slots) => slots.iter().position(Option::is_none),
        }
    }

    /// Insert at `index`. Fixed storage cannot grow.
    pub fn insert(&mut self, index: usize, node: TreeNode<T>) -> Result<()> {
        match self {
            ChildStorage::List(items) => {
                if index > items.len() {
                    return Err(TreeError::out_of_range(index, items.len()));
                }
                items.insert(index, node);
                Ok(())
            }
            ChildStorage::Fixed(_) => Err(TreeError::unsupported("insert", "fixed")),
        }
    }

    /// Overwrite position `index`, returning the previous occupant.
    /// A list has no placeholders, so it rejects `None`.
    pub fn set(&mut self, index: usize, node: Option<TreeNode<T>>) -> Result<Option<TreeNode<T>>> {
        let len = self.len();
        match self {
            ChildStorage::List(items) => {
                let node = node.ok_or(TreeError::unsupported("set-empty", "list"))?;
                let slot = items
                    .get_mut(index)
                    .ok_or(TreeError::out_of_range(index, len))?;
                Ok(Some(std::mem::replace(slot, node)))
            }
            ChildStorage::Fixed(slots) => {
                let slot = slots
                    .get_mut(index)
                    .ok_or(TreeError::out_of_range(index, len))?;
                Ok(std::mem::replace(slot, node))
            }
        }
    }

    /// Remove `node`, returning the position it held.
    pub fn remove(&mut self, node: &TreeNode<T>) -> Result<Option<usize>> {
        let Some(index) = self.position(node) else {
            return Ok(None);
        };
        match self {
            ChildStorage::List(items) => {
                items.remove(index);
            }
            ChildStorage::Fixed(slots) => slots[index] = None,
        }
        Ok(Some(index))
    }

    pub fn clear(&mut self) -> Result<()> {
        match self {
            ChildStorage::List(items) => items.clear(),
            ChildStorage::Fixed(slots) => slots.iter_mut().for_each(|slot| *slot = None),
        }
        Ok(())
    }

    /// Move the entry at `old_index` to `new_index`, shifting the rest.
    pub fn shift(&mut self, old_index: usize, new_index: usize) -> Result<()> {
        let len = self.len();
        for index in [old_index, new_index] {
            if index >= len {
                return Err(TreeError::out_of_range(index, len));
            }
        }
        match self {
            ChildStorage::List(items) => {
                let item = items.remove(old_index);
                items.insert(new_index, item);
            }
            ChildStorage::Fixed(slots) => {
                let slot = slots.remove(old_index);
                slots.insert(new_index, slot);
            }
        }
        Ok(())
    }
}
