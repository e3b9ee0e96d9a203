//! canopy — Observable Trees
//!
//! Move a node, and everyone who cares hears about it exactly once.
//!
//! Generic in-memory trees with a correctness-preserving mutation API
//! and a change-notification layer on top:
//! - Validated insert/remove/set/clear/shift primitives with pointer repair
//! - Join/Deviate/Move structure events for the moved node, its ancestors
//!   and its descendants, one per node per logical edit
//! - Reference-counted operation scheduler coalescing nested edits
//! - Sequence aligner (move/insert/replace/remove) preserving identity
//! - Collection mirrors that track live sources with minimal edit noise
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`align`] | Sequence aligner driving a live collection to a target |
//! | [`config`] | Per-node configuration and child storage strategy |
//! | [`engine`] | Structure change records and event computation |
//! | [`error`] | Error taxonomy |
//! | [`event`] | Structure change event types |
//! | [`identity`] | Reference identity used to pair mirror elements |
//! | [`mirror`] | Single-source and multi-source collection mirrors |
//! | [`node`] | Tree node and mutation primitives |
//! | [`observable`] | Notifiers, collection changes, observable list |
//! | [`scheduler`] | Key-addressed deduplicating operation scheduler |
//! | [`storage`] | List and fixed-slot child storage |
//! | [`traverse`] | Upstream, level-order, pre-order, post-order traversal |
//!
//! # Quick Start
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use canopy::{StructureAction, TreeNode};
//!
//! // A{B, C{D}}
//! let a = TreeNode::new("A");
//! let b = TreeNode::new("B");
//! let c = TreeNode::new("C");
//! let d = TreeNode::new("D");
//! a.add_child(&b).unwrap();
//! a.add_child(&c).unwrap();
//! c.add_child(&d).unwrap();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let _sub = a.subscribe_structure_changed(move |e| sink.borrow_mut().push(e.action));
//!
//! // Move D under B: same tree, so A hears a single Move
//! b.insert_child(0, &d).unwrap();
//! assert_eq!(*seen.borrow(), vec![StructureAction::Move]);
//! ```
//!
//! Author: Moroya Sakamoto

pub mod align;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod identity;
pub mod mirror;
pub mod node;
pub mod observable;
pub mod scheduler;
pub mod storage;
pub mod traverse;

pub use align::{align, align_by, AlignReport, LiveSequence};
pub use config::{NodeConfig, StorageKind};
pub use engine::{compute_events, ChangeRecord};
pub use error::{Result, TreeError};
pub use event::{AncestorInfo, DescendantInfo, StructureAction, StructureChangedEvent};
pub use identity::Identity;
pub use mirror::{CombinableCollection, IdentityPair, ImitableCollection, SourceSequence};
pub use node::{TreeNode, DISPOSED_PROPERTY, PARENT_PROPERTY};
pub use observable::{CollectionChange, Notifier, NotifyingSequence, ObservableList, Subscription};
pub use scheduler::{OpKey, OperationScheduler, ScheduleScope, ScopeState};
pub use storage::ChildStorage;
pub use traverse::{LevelOrder, PreOrder, Upstream};
