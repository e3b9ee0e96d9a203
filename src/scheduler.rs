//! Operation scheduler
//!
//! Reference-counted, key-addressed deferred execution. Each registered
//! key owns one action and a small state machine:
//!
//! ```text
//!   Idle ──enter──▶ Mutating(1) ──enter──▶ Mutating(n+1)
//!    ▲                   │                      │
//!    └──── flush ◀── exit(1)       exit(n+1) ───┘
//! ```
//!
//! The action runs exactly once, when the outermost scope of its key
//! closes. A value-guarded scope (`late_evaluate`) samples a value on
//! outermost entry and only runs the action when the sample differs at
//! the final exit. Scopes are RAII guards; nothing here locks, because
//! all reentrancy happens on a single call stack.
//!
//! Author: Moroya Sakamoto

use std::any::TypeId;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::error::{Result, TreeError};

type Action = Rc<dyn Fn()>;
type ChangeCheck = Box<dyn FnOnce() -> bool>;
type Registry = RefCell<FxHashMap<OpKey, Operation>>;

/// Key addressing a registered operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKey {
    /// Explicitly named key
    Named(Cow<'static, str>),
    /// Key derived from a closure type (unkeyed execution)
    Closure(TypeId),
}

impl From<&'static str> for OpKey {
    fn from(name: &'static str) -> Self {
        OpKey::Named(Cow::Borrowed(name))
    }
}

impl From<String> for OpKey {
    fn from(name: String) -> Self {
        OpKey::Named(Cow::Owned(name))
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKey::Named(name) => f.write_str(name),
            OpKey::Closure(id) => write!(f, "closure {id:?}"),
        }
    }
}

/// Scope state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Idle,
    Mutating { depth: usize },
}

struct Operation {
    action: Action,
    state: ScopeState,
    /// Change check captured by the outermost value-guarded entry
    check: Option<ChangeCheck>,
    /// Unkeyed registrations are dropped once idle again
    transient: bool,
}

impl Operation {
    fn new(action: Action, transient: bool) -> Self {
        Self {
            action,
            state: ScopeState::Idle,
            check: None,
            transient,
        }
    }

    fn open(&mut self, check: Option<ChangeCheck>) {
        self.state = match self.state {
            ScopeState::Idle => {
                self.check = check;
                ScopeState::Mutating { depth: 1 }
            }
            ScopeState::Mutating { depth } => ScopeState::Mutating { depth: depth + 1 },
        };
    }
}

/// Deduplicating scheduler; clones share the same registry
#[derive(Clone, Default)]
pub struct OperationScheduler {
    ops: Rc<Registry>,
}

impl fmt::Debug for OperationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops = self.ops.borrow();
        f.debug_map()
            .entries(ops.iter().map(|(key, op)| (key.to_string(), op.state)))
            .finish()
    }
}

impl OperationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler whose only registration is `key` bound to `action`.
    pub(crate) fn with_operation(key: impl Into<OpKey>, action: impl Fn() + 'static) -> Self {
        let mut ops = FxHashMap::default();
        ops.insert(key.into(), Operation::new(Rc::new(action), false));
        Self {
            ops: Rc::new(RefCell::new(ops)),
        }
    }

    /// Bind `key` to `action`.
    pub fn register(&self, key: impl Into<OpKey>, action: impl Fn() + 'static) -> Result<()> {
        let key = key.into();
        let mut ops = self.ops.borrow_mut();
        if ops.contains_key(&key) {
            return Err(TreeError::DuplicateKey {
                key: key.to_string(),
            });
        }
        ops.insert(key, Operation::new(Rc::new(action), false));
        Ok(())
    }

    /// Remove a registration. Open scopes on the key become no-ops.
    pub fn unregister(&self, key: &OpKey) -> bool {
        self.ops.borrow_mut().remove(key).is_some()
    }

    pub fn is_registered(&self, key: &OpKey) -> bool {
        self.ops.borrow().contains_key(key)
    }

    pub fn state(&self, key: &OpKey) -> Option<ScopeState> {
        self.ops.borrow().get(key).map(|op| op.state)
    }

    /// Current nesting depth of `key`, `None` when unregistered
    pub fn depth(&self, key: &OpKey) -> Option<usize> {
        self.state(key).map(|state| match state {
            ScopeState::Idle => 0,
            ScopeState::Mutating { depth } => depth,
        })
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.ops.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.borrow().is_empty()
    }

    /// Open a scope on `key`. The bound action runs once, when the
    /// outermost scope of the key is dropped.
    pub fn execute_unique(&self, key: impl Into<OpKey>) -> Result<ScheduleScope> {
        self.enter(key.into(), None)
    }

    /// Open a value-guarded scope on `key`.
    ///
    /// `sample` is evaluated on the outermost entry and again at the final
    /// exit; the action runs only if the two samples differ. Nested
    /// entries reuse the outermost sample.
    pub fn late_evaluate<V, F>(&self, key: impl Into<OpKey>, sample: F) -> Result<ScheduleScope>
    where
        V: PartialEq + 'static,
        F: Fn() -> V + 'static,
    {
        let key = key.into();
        let check: Option<ChangeCheck> = match self.state(&key) {
            None => {
                return Err(TreeError::KeyNotFound {
                    key: key.to_string(),
                })
            }
            Some(ScopeState::Idle) => {
                let initial = sample();
                Some(Box::new(move || sample() != initial))
            }
            Some(ScopeState::Mutating { .. }) => None,
        };
        self.enter(key, check)
    }

    /// Unkeyed variant: the key is derived from the closure's type, so the
    /// same closure expression reached again on the same call stack joins
    /// the open scope instead of running twice. The temporary registration
    /// is removed once the scope count returns to zero.
    pub fn execute_unique_fn<F>(&self, action: F) -> ScheduleScope
    where
        F: Fn() + 'static,
    {
        let key = OpKey::Closure(TypeId::of::<F>());
        self.ops
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| Operation::new(Rc::new(action), true))
            .open(None);
        self.scope(key)
    }

    fn enter(&self, key: OpKey, check: Option<ChangeCheck>) -> Result<ScheduleScope> {
        {
            let mut ops = self.ops.borrow_mut();
            let op = ops.get_mut(&key).ok_or_else(|| TreeError::KeyNotFound {
                key: key.to_string(),
            })?;
            op.open(check);
        }
        Ok(self.scope(key))
    }

    fn scope(&self, key: OpKey) -> ScheduleScope {
        ScheduleScope {
            registry: Rc::downgrade(&self.ops),
            key,
        }
    }
}

/// RAII guard for one entry into a keyed operation.
#[must_use = "the scope closes (and may run its action) as soon as it is dropped"]
pub struct ScheduleScope {
    registry: Weak<Registry>,
    key: OpKey,
}

impl ScheduleScope {
    pub fn key(&self) -> &OpKey {
        &self.key
    }
}

impl fmt::Debug for ScheduleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleScope")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for ScheduleScope {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            close(&registry, &self.key);
        }
    }
}

fn close(registry: &Registry, key: &OpKey) {
    let flush = {
        let mut ops = registry.borrow_mut();
        let Some(op) = ops.get_mut(key) else {
            return;
        };
        let state = op.state;
        match state {
            ScopeState::Mutating { depth } if depth > 1 => {
                op.state = ScopeState::Mutating { depth: depth - 1 };
                None
            }
            ScopeState::Mutating { .. } => {
                op.state = ScopeState::Idle;
                let transient = op.transient;
                let flush = (Rc::clone(&op.action), op.check.take());
                if transient {
                    ops.remove(key);
                }
                Some(flush)
            }
            ScopeState::Idle => {
                warn!(%key, "scope closed on an idle operation");
                None
            }
        }
    };

    // The registry borrow is released: the action may reenter freely.
    if let Some((action, check)) = flush {
        let changed = check.map_or(true, |check| check());
        trace!(%key, changed, "operation scope flushed");
        if changed {
            action();
        }
    }
}
