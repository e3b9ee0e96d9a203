//! Collection mirrors
//!
//! Derived collections that follow live sources and re-emit changes in
//! the collection-change shape:
//!
//! - [`ImitableCollection`]: one source, each element converted once and
//!   paired with its source element by identity.
//! - [`CombinableCollection`]: several sources concatenated into one
//!   merged list, kept in step by the sequence aligner.
//!
//! Author: Moroya Sakamoto

mod combinable;
mod imitable;

pub use combinable::{CombinableCollection, SourceSequence};
pub use imitable::{IdentityPair, ImitableCollection};
