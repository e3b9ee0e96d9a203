//! Tree traversal
//!
//! Lazy iterators over node handles. Each step reads the tree as it is
//! at that moment; editing the tree mid-iteration is allowed but the
//! iterator does not see a consistent snapshot.
//!
//! Author: Moroya Sakamoto

use std::collections::VecDeque;

use crate::node::TreeNode;

/// Ancestors from the parent up to the root
pub struct Upstream<T> {
    next: Option<TreeNode<T>>,
}

impl<T> Iterator for Upstream<T> {
    type Item = TreeNode<T>;

    fn next(&mut self) -> Option<TreeNode<T>> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

/// Breadth-first, starting at the node itself
pub struct LevelOrder<T> {
    queue: VecDeque<TreeNode<T>>,
}

impl<T> Iterator for LevelOrder<T> {
    type Item = TreeNode<T>;

    fn next(&mut self) -> Option<TreeNode<T>> {
        let node = self.queue.pop_front()?;
        self.queue.extend(node.children());
        Some(node)
    }
}

/// Depth-first, parents before children
pub struct PreOrder<T> {
    stack: Vec<TreeNode<T>>,
}

impl<T> Iterator for PreOrder<T> {
    type Item = TreeNode<T>;

    fn next(&mut self) -> Option<TreeNode<T>> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().into_iter().rev());
        Some(node)
    }
}

impl<T> TreeNode<T> {
    pub fn upstream(&self) -> Upstream<T> {
        Upstream {
            next: self.parent(),
        }
    }

    pub fn level_order(&self) -> LevelOrder<T> {
        LevelOrder {
            queue: VecDeque::from([self.clone()]),
        }
    }

    pub fn pre_order(&self) -> PreOrder<T> {
        PreOrder {
            stack: vec![self.clone()],
        }
    }

    /// Children before parents; the node itself comes last.
    pub fn post_order(&self) -> Vec<TreeNode<T>> {
        let mut out: Vec<TreeNode<T>> = self.pre_order_mirrored().collect();
        out.reverse();
        out
    }

    // Pre-order with children visited right to left; reversed, it is
    // post-order with children left to right.
    fn pre_order_mirrored(&self) -> impl Iterator<Item = TreeNode<T>> {
        let mut stack = vec![self.clone()];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children());
            Some(node)
        })
    }

    /// Everything below this node, breadth-first
    pub fn descendants(&self) -> impl Iterator<Item = TreeNode<T>> {
        self.level_order().skip(1)
    }

    pub fn root(&self) -> TreeNode<T> {
        self.upstream().last().unwrap_or_else(|| self.clone())
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Edges to the root
    pub fn depth(&self) -> usize {
        self.upstream().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    //   a
    //  / \
    // b   c
    //     |
    //     d
    fn sample() -> [TreeNode<char>; 4] {
        let [a, b, c, d] = ['a', 'b', 'c', 'd'].map(TreeNode::new);
        a.add_child(&b).unwrap();
        a.add_child(&c).unwrap();
        c.add_child(&d).unwrap();
        [a, b, c, d]
    }

    fn chars(nodes: impl IntoIterator<Item = TreeNode<char>>) -> String {
        nodes.into_iter().map(|n| n.value()).collect()
    }

    #[test]
    fn test_orders() {
        let [a, ..] = sample();
        assert_eq!(chars(a.level_order()), "abcd");
        assert_eq!(chars(a.pre_order()), "abcd");
        assert_eq!(chars(a.post_order()), "bdca");
        assert_eq!(chars(a.descendants()), "bcd");
    }

    #[test]
    fn test_upstream_root_depth() {
        let [a, b, c, d] = sample();
        assert_eq!(chars(d.upstream()), "ca");
        assert!(d.root().ptr_eq(&a));
        assert!(a.root().ptr_eq(&a));
        assert_eq!(d.depth(), 2);
        assert_eq!(b.depth(), 1);
        assert!(a.is_root() && !c.is_root());
    }

    #[test]
    fn test_wider_post_order() {
        let [a, b, ..] = sample();
        let e = TreeNode::new('e');
        b.add_child(&e).unwrap();
        assert_eq!(chars(a.post_order()), "ebdca");
        assert_eq!(chars(a.pre_order()), "abecd");
    }
}
