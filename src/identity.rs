//! Reference identity
//!
//! Mirrors pair source elements with derived elements by *which* element
//! it is, not by value: two equal strings in a source are two elements.
//!
//! Author: Moroya Sakamoto

use std::rc::Rc;

use crate::node::TreeNode;

/// An element with a stable address-based identity
pub trait Identity {
    fn identity(&self) -> usize;
}

impl<T: ?Sized> Identity for Rc<T> {
    fn identity(&self) -> usize {
        Rc::as_ptr(self) as *const () as usize
    }
}

impl<T> Identity for TreeNode<T> {
    fn identity(&self) -> usize {
        self.id()
    }
}
