//! Tree nodes.
//!
//! Ownership runs child-to-parent: every entry holds a strong reference
//! on its parent and the parent keeps a weak, insertion-ordered list of
//! children. An entry therefore lives exactly as long as a descendant or
//! an external handle does; the root is anchored by the hub itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resource::Resource;
use crate::sample::pool::QuotaLease;

pub type EntryRef = Rc<Entry>;

/// Lifecycle state of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Organizes children; carries no resource.
    Namespace,
    /// A resource that exists to hold admin settings, with no typed
    /// behavior yet.
    Placeholder,
    Input,
    Output,
    Observation,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Namespace => "namespace",
            EntryKind::Placeholder => "placeholder",
            EntryKind::Input => "input",
            EntryKind::Output => "output",
            EntryKind::Observation => "observation",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot-phase bookkeeping bits. The same layout backs namespace
/// entries and resource-side bookkeeping so the two cannot drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// Created since the last snapshot.
    pub const NEW: Flags = Flags(0x01);
    /// Included in the current filtered snapshot.
    pub const RELEVANT: Flags = Flags(0x02);
    /// NEW is to be cleared when the snapshot finishes.
    pub const CLEAR_NEW: Flags = Flags(0x04);
    /// Tombstone, retained until the next flush.
    pub const DELETED: Flags = Flags(0x08);

    pub fn empty() -> Flags {
        Flags(0)
    }

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    pub const fn intersect(self, other: Flags) -> Flags {
        Flags(self.0 & other.0)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

/// Discriminated payload: a namespace carries bookkeeping flags, every
/// other kind owns its resource state.
pub(crate) enum Payload {
    Namespace(Flags),
    Resource(Box<Resource>),
}

/// A node in the resource tree.
pub struct Entry {
    name: String,
    parent: Option<EntryRef>,
    children: RefCell<Vec<Weak<Entry>>>,
    payload: RefCell<Payload>,
    _lease: Option<QuotaLease>,
}

impl Entry {
    pub(crate) fn new_root() -> EntryRef {
        Rc::new(Entry {
            name: String::new(),
            parent: None,
            children: RefCell::new(Vec::new()),
            payload: RefCell::new(Payload::Namespace(Flags::NEW)),
            _lease: None,
        })
    }

    /// Create and link a child namespace. The lease is the child's slot
    /// in the entry pool, returned when the entry dies.
    pub(crate) fn new_child(parent: &EntryRef, name: &str, lease: QuotaLease) -> EntryRef {
        let child = Rc::new(Entry {
            name: name.to_string(),
            parent: Some(Rc::clone(parent)),
            children: RefCell::new(Vec::new()),
            payload: RefCell::new(Payload::Namespace(Flags::NEW)),
            _lease: Some(lease),
        });
        parent.children.borrow_mut().push(Rc::downgrade(&child));
        child
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&EntryRef> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn kind(&self) -> EntryKind {
        match &*self.payload.borrow() {
            Payload::Namespace(_) => EntryKind::Namespace,
            Payload::Resource(res) => res.kind(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(&*self.payload.borrow(), Payload::Namespace(flags) if flags.contains(Flags::DELETED))
    }

    /// Namespace flags, when this entry is a namespace.
    pub fn flags(&self) -> Option<Flags> {
        match &*self.payload.borrow() {
            Payload::Namespace(flags) => Some(*flags),
            Payload::Resource(_) => None,
        }
    }

    /// The snapshot bits, wherever they live for this entry's kind.
    pub fn snapshot_flags(&self) -> Flags {
        match &*self.payload.borrow() {
            Payload::Namespace(flags) => *flags,
            Payload::Resource(res) => res.flags(),
        }
    }

    pub(crate) fn update_snapshot_flags(&self, f: impl FnOnce(&mut Flags)) {
        match &mut *self.payload.borrow_mut() {
            Payload::Namespace(flags) => f(flags),
            Payload::Resource(res) => res.update_flags(f),
        }
    }

    pub(crate) fn replace_payload(&self, payload: Payload) -> Payload {
        std::mem::replace(&mut *self.payload.borrow_mut(), payload)
    }

    /// Run `f` against the resource payload, if there is one.
    pub(crate) fn with_resource<R>(&self, f: impl FnOnce(&Resource) -> R) -> Option<R> {
        match &*self.payload.borrow() {
            Payload::Resource(res) => Some(f(res)),
            Payload::Namespace(_) => None,
        }
    }

    pub(crate) fn with_resource_mut<R>(&self, f: impl FnOnce(&mut Resource) -> R) -> Option<R> {
        match &mut *self.payload.borrow_mut() {
            Payload::Resource(res) => Some(f(res)),
            Payload::Namespace(_) => None,
        }
    }

    /// Look up a direct child by name. Tombstones are consulted like any
    /// other child; the caller decides what a deleted match means.
    pub fn find_child(&self, name: &str) -> Option<EntryRef> {
        self.children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|c| c.name == name)
    }

    /// First live child, in insertion order.
    pub fn first_child(&self) -> Option<EntryRef> {
        self.children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|c| !c.is_deleted())
    }

    /// First child including tombstones.
    pub fn first_child_ex(&self) -> Option<EntryRef> {
        self.children.borrow().iter().find_map(Weak::upgrade)
    }

    /// Next live sibling after this entry, in insertion order.
    pub fn next_sibling(self: &Rc<Self>) -> Option<EntryRef> {
        self.siblings_after().into_iter().find(|c| !c.is_deleted())
    }

    /// Next sibling including tombstones.
    pub fn next_sibling_ex(self: &Rc<Self>) -> Option<EntryRef> {
        self.siblings_after().into_iter().next()
    }

    fn siblings_after(self: &Rc<Self>) -> Vec<EntryRef> {
        let Some(parent) = &self.parent else {
            return Vec::new();
        };
        let list = parent.children.borrow();
        let mut seen_self = false;
        let mut after = Vec::new();
        for candidate in list.iter().filter_map(Weak::upgrade) {
            if seen_self {
                after.push(candidate);
            } else if Rc::ptr_eq(&candidate, self) {
                seen_self = true;
            }
        }
        after
    }

    /// Children snapshot for traversal, in insertion order.
    pub(crate) fn children_snapshot(&self, include_deleted: bool) -> Vec<EntryRef> {
        self.children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| include_deleted || !c.is_deleted())
            .collect()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        // Unlink from the parent's child list; anything else in there
        // that no longer upgrades died the same way.
        if let Some(parent) = &self.parent {
            parent.children.borrow_mut().retain(|w| w.strong_count() > 0);
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("name", &self.name).finish()
    }
}
