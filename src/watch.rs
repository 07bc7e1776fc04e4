//! Change dispatch: who hears about resources appearing and going
//! away.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tree::entry::EntryKind;

/// Whether the resource appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Added,
    Removed,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Added => "added",
            ChangeOp::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record handed to change listeners. Listeners run
/// synchronously and must not mutate the tree while handling one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeEvent {
    /// Absolute path of the affected entry.
    pub path: String,
    /// Entry type just after the change for ADDED, just before it for
    /// REMOVED.
    pub kind: EntryKind,
    pub op: ChangeOp,
}

pub type ChangeListener = Rc<dyn Fn(&ChangeEvent)>;

/// Opaque ticket for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchHandle(u32);

#[derive(Default)]
pub(crate) struct Listeners {
    items: RefCell<Vec<(u32, ChangeListener)>>,
    next_id: Cell<u32>,
}

impl Listeners {
    pub fn add(&self, listener: ChangeListener) -> WatchHandle {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        self.items.borrow_mut().push((id, listener));
        WatchHandle(id)
    }

    pub fn remove(&self, handle: WatchHandle) {
        self.items.borrow_mut().retain(|(id, _)| *id != handle.0);
    }

    pub fn notify(&self, event: &ChangeEvent) {
        // Snapshot first so a listener registering or removing
        // listeners does not alias the registry mid-dispatch.
        let snapshot: Vec<ChangeListener> = self
            .items
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
