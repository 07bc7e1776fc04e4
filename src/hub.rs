//! The hub: one tree of named entries and everything that moves
//! through it.
//!
//! Single-threaded cooperative: all mutation runs on the caller's
//! thread, listeners and traversals execute synchronously, and no
//! operation suspends partway.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, error, warn};

use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::sample::pool::Quota;
use crate::sample::{DataType, SamplePools, SampleRef};
use crate::tree::entry::{Entry, EntryKind, EntryRef, Flags, Payload};
use crate::tree::path;
use crate::watch::{ChangeEvent, ChangeListener, ChangeOp, Listeners, WatchHandle};

/// Name of the root child that namespaces observations. Auto-created on
/// first reference.
pub const OBSERVATION_NAMESPACE: &str = "obs";

pub struct Hub {
    config: HubConfig,
    root: EntryRef,
    entries: Rc<Quota>,
    pools: SamplePools,
    /// Strong holds on tombstone candidates until the next flush.
    zombies: RefCell<Vec<EntryRef>>,
    /// Keeps the observation namespace alive once first referenced.
    obs_anchor: RefCell<Option<EntryRef>>,
    listeners: Listeners,
    updating: Cell<bool>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let entries = Quota::new("entry pool", config.entry_capacity);
        let pools = SamplePools::new(&config.strings);
        Self {
            root: Entry::new_root(),
            entries,
            pools,
            zombies: RefCell::new(Vec::new()),
            obs_anchor: RefCell::new(None),
            listeners: Listeners::default(),
            updating: Cell::new(false),
            config,
        }
    }

    pub fn root(&self) -> &EntryRef {
        &self.root
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn pools(&self) -> &SamplePools {
        &self.pools
    }

    pub fn entries_in_use(&self) -> usize {
        self.entries.in_use()
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve `path` against `base` (or the root, when absolute)
    /// without creating anything. Tombstoned interior entries are
    /// traversed; a tombstoned final entry resolves to `None`.
    pub fn find_entry(&self, base: &EntryRef, path_str: &str) -> Option<EntryRef> {
        let base = if path::is_absolute(path_str) { &self.root } else { base };
        let segments = path::segments(path_str, &self.config).ok()?;
        let mut current = Rc::clone(base);
        for segment in segments {
            current = current.find_child(segment)?;
        }
        if current.is_deleted() {
            None
        } else {
            Some(current)
        }
    }

    /// Resolve `path`, creating missing segments as namespaces. A
    /// tombstone matched on the way is resurrected in place, keeping
    /// the subtree's identity. On pool exhaustion every entry this call
    /// created is unwound, deepest first, and the tree is left as it
    /// was.
    pub fn get_entry(&self, base: &EntryRef, path_str: &str) -> Result<EntryRef> {
        let base = if path::is_absolute(path_str) { &self.root } else { base };
        let segments = path::segments(path_str, &self.config)?;
        let mut created: Vec<EntryRef> = Vec::new();
        let mut current = Rc::clone(base);
        for segment in segments {
            match current.find_child(segment) {
                Some(child) => {
                    if child.is_deleted() {
                        self.resurrect(&child);
                    }
                    current = child;
                }
                None => {
                    let Some(lease) = self.entries.try_take() else {
                        drop(current);
                        while let Some(entry) = created.pop() {
                            debug!(name = entry.name(), "rolling back autoprovisioned entry");
                            drop(entry);
                        }
                        warn!(path = path_str, "entry pool exhausted during autoprovision");
                        return Err(Error::NoMemory("entry pool"));
                    };
                    let child = Entry::new_child(&current, segment, lease);
                    debug!(name = segment, "created namespace entry");
                    created.push(Rc::clone(&child));
                    current = child;
                }
            }
        }
        Ok(current)
    }

    fn resurrect(&self, entry: &EntryRef) {
        debug!(name = entry.name(), "resurrecting tombstoned entry");
        drop(entry.replace_payload(Payload::Namespace(Flags::NEW)));
        self.zombies.borrow_mut().retain(|z| !Rc::ptr_eq(z, entry));
    }

    // ========================================================================
    // Kind transitions
    // ========================================================================

    /// Resolve (creating as needed) and make sure the final entry
    /// carries a resource, promoting a namespace to a placeholder. The
    /// placeholder flavor follows the location: under the observation
    /// namespace it is built with observation state.
    pub fn get_resource(&self, base: &EntryRef, path_str: &str) -> Result<EntryRef> {
        let entry = self.get_entry(base, path_str)?;
        self.ensure_resource(&entry);
        Ok(entry)
    }

    fn ensure_resource(&self, entry: &EntryRef) {
        let Some(flags) = entry.flags() else {
            return; // already a resource
        };
        let resource = if under_observation_namespace(entry) {
            Resource::obs_placeholder(flags)
        } else {
            Resource::io_placeholder(flags)
        };
        drop(entry.replace_payload(Payload::Resource(Box::new(resource))));
        debug!(name = entry.name(), "promoted namespace to placeholder");
    }

    pub fn create_input(
        &self,
        base: &EntryRef,
        path_str: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<EntryRef> {
        self.create_io(base, path_str, EntryKind::Input, data_type, units)
    }

    pub fn create_output(
        &self,
        base: &EntryRef,
        path_str: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<EntryRef> {
        self.create_io(base, path_str, EntryKind::Output, data_type, units)
    }

    fn create_io(
        &self,
        base: &EntryRef,
        path_str: &str,
        kind: EntryKind,
        data_type: DataType,
        units: &str,
    ) -> Result<EntryRef> {
        let entry = self.get_resource(base, path_str)?;
        eprintln!("DEBUG create_io pre-match entry kind = {:?} ptr = {:p}", entry.kind(), Rc::as_ptr(&entry));
        match entry.kind() {
            EntryKind::Placeholder => {
                entry.with_resource_mut(|r| r.convert_to_typed(kind, data_type, units));
                self.notify(&entry, kind, ChangeOp::Added);
                eprintln!("DEBUG create_io post-convert entry kind = {:?} ptr = {:p}", entry.kind(), Rc::as_ptr(&entry));
                Ok(entry)
            }
            existing if existing == kind => {
                let unchanged = entry
                    .with_resource(|r| r.data_type() == data_type && r.units() == units)
                    .unwrap_or(false);
                if unchanged {
                    Ok(entry)
                } else {
                    Err(Error::BadParameter(format!(
                        "{path_str:?} already exists with a different type or units"
                    )))
                }
            }
            existing => Err(Error::BadParameter(format!(
                "cannot create {kind} at {path_str:?}: entry is {existing}"
            ))),
        }
    }

    /// Resolve or create an observation. Replaying the call returns the
    /// same entry without a second ADDED event.
    pub fn get_observation(&self, base: &EntryRef, path_str: &str) -> Result<EntryRef> {
        // First reference materializes the observation namespace; the
        // hub anchors it from then on.
        if self.obs_anchor.borrow().is_none() {
            let ns = self.get_entry(&self.root, OBSERVATION_NAMESPACE)?;
            *self.obs_anchor.borrow_mut() = Some(ns);
        }
        let entry = self.get_resource(base, path_str)?;
        eprintln!("DEBUG get_observation entry kind = {:?} ptr = {:p} root ptr = {:p}", entry.kind(), Rc::as_ptr(&entry), Rc::as_ptr(&self.root));
        match entry.kind() {
            EntryKind::Observation => Ok(entry),
            EntryKind::Placeholder => {
                entry.with_resource_mut(|r| r.convert_to_observation());
                self.notify(&entry, EntryKind::Observation, ChangeOp::Added);
                Ok(entry)
            }
            existing => Err(Error::BadParameter(format!(
                "cannot observe {path_str:?}: entry is {existing}"
            ))),
        }
    }

    /// Remove an input or output. The typed resource disappears from
    /// the external model (REMOVED fires either way); admin settings
    /// keep the entry alive as a placeholder, otherwise it reverts to a
    /// namespace and lingers as a tombstone candidate until the next
    /// flush.
    pub fn delete_io(&self, entry: &EntryRef) -> Result<()> {
        let kind = entry.kind();
        if !matches!(kind, EntryKind::Input | EntryKind::Output) {
            return Err(Error::BadParameter(format!(
                "{} is not an input or output",
                entry.name()
            )));
        }
        self.notify(entry, kind, ChangeOp::Removed);
        self.unroute(entry);
        let keep = entry.with_resource(|r| r.has_admin_settings()).unwrap_or(false);
        if keep {
            entry.with_resource_mut(|r| r.demote_to_placeholder());
            debug!(name = entry.name(), "demoted to placeholder, admin settings remain");
        } else {
            self.retire(entry);
        }
        Ok(())
    }

    pub fn delete_observation(&self, entry: &EntryRef) -> Result<()> {
        if entry.kind() != EntryKind::Observation {
            return Err(Error::BadParameter(format!(
                "{} is not an observation",
                entry.name()
            )));
        }
        self.notify(entry, EntryKind::Observation, ChangeOp::Removed);
        self.unroute(entry);
        self.retire(entry);
        Ok(())
    }

    /// Turn a resource entry back into a namespace, releasing the
    /// resource, and hold the entry until the next flush.
    fn retire(&self, entry: &EntryRef) {
        let kept = Flags::NEW.union(Flags::RELEVANT).union(Flags::CLEAR_NEW);
        let flags = entry
            .with_resource(|r| r.flags().intersect(kept))
            .unwrap_or_default();
        drop(entry.replace_payload(Payload::Namespace(flags)));
        self.zombies.borrow_mut().push(Rc::clone(entry));
        debug!(name = entry.name(), "resource released, entry awaiting flush");
    }

    fn unroute(&self, entry: &EntryRef) {
        if let Some(src) = entry.with_resource(|r| r.source_entry()).flatten() {
            src.with_resource_mut(|r| r.remove_dest(entry));
        }
        entry.with_resource_mut(|r| r.set_source_link(None));
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Route `src`'s accepted samples into `dest`; `None` clears the
    /// route. The source graph stays acyclic: an edge that would close
    /// a loop is refused and nothing changes.
    pub fn set_source(&self, dest: &EntryRef, src: Option<&EntryRef>) -> Result<()> {
        if dest.kind() == EntryKind::Namespace {
            return Err(Error::BadParameter(format!(
                "{} carries no resource",
                dest.name()
            )));
        }
        if let Some(src) = src {
            if src.kind() == EntryKind::Namespace {
                return Err(Error::BadParameter(format!(
                    "{} carries no resource",
                    src.name()
                )));
            }
            // Walk the prospective chain dest <- src <- src.source <- ...
            let mut hop = Some(Rc::clone(src));
            while let Some(entry) = hop {
                if Rc::ptr_eq(&entry, dest) {
                    return Err(Error::Duplicate);
                }
                hop = entry.with_resource(|r| r.source_entry()).flatten();
            }
        }
        self.unroute(dest);
        if let Some(src) = src {
            dest.with_resource_mut(|r| r.set_source_link(Some(src)));
            src.with_resource_mut(|r| r.add_dest(dest));
            // A fresh route carries the source's current value across.
            if let Some((dt, sample)) = src.with_resource(|r| r.current()).flatten() {
                if self.updating.get() {
                    dest.with_resource_mut(|r| r.stash_pending(dt, sample));
                } else if let Err(e) = self.deliver(dest, dt, sample) {
                    debug!(dest = dest.name(), error = %e, "initial routed delivery dropped");
                }
            }
        }
        Ok(())
    }

    pub fn get_source(&self, dest: &EntryRef) -> Option<EntryRef> {
        dest.with_resource(|r| r.source_entry()).flatten()
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push a sample into an entry's resource. Pushed at a namespace
    /// the sample is dropped and the call fails; while an admin update
    /// window is open the push is refused with [`Error::InProgress`].
    pub fn push(&self, entry: &EntryRef, data_type: DataType, sample: SampleRef) -> Result<()> {
        if entry.kind() == EntryKind::Namespace {
            drop(sample);
            return Err(Error::BadParameter(format!(
                "cannot push into namespace {:?}",
                entry.name()
            )));
        }
        if self.updating.get() {
            debug!(name = entry.name(), "push refused during admin update");
            return Err(Error::InProgress);
        }
        self.deliver(entry, data_type, sample)
    }

    /// Accept + fan out. Route-driven deliveries land here directly and
    /// coalesce during an update window instead of failing.
    fn deliver(&self, entry: &EntryRef, data_type: DataType, sample: SampleRef) -> Result<()> {
        let outcome = entry
            .with_resource_mut(|r| r.accept(data_type, sample, &self.pools))
            .transpose()?
            .flatten();
        let Some((out_type, out_sample)) = outcome else {
            return Ok(());
        };

        let handlers = entry.with_resource(|r| r.handlers()).unwrap_or_default();
        for handler in handlers {
            handler(out_type, &out_sample);
        }

        let dests = entry.with_resource(|r| r.dest_entries()).unwrap_or_default();
        for dest in dests {
            if self.updating.get() {
                dest.with_resource_mut(|r| r.stash_pending(out_type, Rc::clone(&out_sample)));
            } else if let Err(e) = self.deliver(&dest, out_type, Rc::clone(&out_sample)) {
                debug!(dest = dest.name(), error = %e, "routed delivery dropped");
            }
        }
        Ok(())
    }

    pub fn add_push_handler(
        &self,
        entry: &EntryRef,
        handler: impl Fn(DataType, &SampleRef) + 'static,
    ) -> Result<()> {
        entry
            .with_resource_mut(|r| r.add_handler(Rc::new(handler)))
            .ok_or_else(|| Error::BadParameter(format!("{} carries no resource", entry.name())))
    }

    pub fn current_value(&self, entry: &EntryRef) -> Option<(DataType, SampleRef)> {
        entry.with_resource(|r| r.current()).flatten()
    }

    pub fn units(&self, entry: &EntryRef) -> String {
        entry
            .with_resource(|r| r.units().to_string())
            .unwrap_or_default()
    }

    pub fn data_type(&self, entry: &EntryRef) -> Option<DataType> {
        entry.with_resource(|r| r.data_type())
    }

    // ========================================================================
    // Update barrier
    // ========================================================================

    /// Open an admin update window: external pushes are refused and
    /// route-driven deliveries collapse to the latest sample per
    /// resource until [`Hub::end_update`].
    pub fn start_update(&self) {
        self.updating.set(true);
        debug!("admin update window opened");
    }

    /// Close the window and deliver each resource's coalesced sample.
    pub fn end_update(&self) {
        self.updating.set(false);
        let mut pending = Vec::new();
        self.for_each_resource(|entry, _| {
            if let Some(p) = entry.with_resource_mut(|r| r.take_pending()).flatten() {
                pending.push((Rc::clone(entry), p));
            }
        });
        for (entry, (data_type, sample)) in pending {
            if let Err(e) = self.deliver(&entry, data_type, sample) {
                debug!(name = entry.name(), error = %e, "coalesced delivery dropped");
            }
        }
        debug!("admin update window closed");
    }

    pub fn is_updating(&self) -> bool {
        self.updating.get()
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Depth-first pre-order walk invoking `f` on every entry that
    /// carries a resource.
    pub fn for_each_resource(&self, mut f: impl FnMut(&EntryRef, EntryKind)) {
        walk(&self.root, &mut |entry| {
            let kind = entry.kind();
            if kind != EntryKind::Namespace {
                f(entry, kind);
            }
        });
    }

    /// Print `entry`'s path relative to `base`: `/`-prefixed when
    /// `base` is the root, bare otherwise, empty when the two are the
    /// same entry.
    pub fn get_path(&self, base: &EntryRef, entry: &EntryRef) -> Result<String> {
        if Rc::ptr_eq(base, entry) {
            return Ok(String::new());
        }
        let mut names: Vec<String> = Vec::new();
        let mut current = Rc::clone(entry);
        while !Rc::ptr_eq(&current, base) {
            names.push(current.name().to_string());
            let Some(parent) = current.parent().cloned() else {
                return Err(Error::NotFound);
            };
            current = parent;
        }
        names.reverse();
        let mut printed = String::new();
        if base.is_root() {
            printed.push('/');
        }
        printed.push_str(&names.join("/"));
        if printed.len() > self.config.max_path_bytes {
            return Err(Error::Overflow(self.config.max_path_bytes));
        }
        Ok(printed)
    }

    // ========================================================================
    // Snapshot bookkeeping
    // ========================================================================

    pub fn set_relevant(&self, entry: &EntryRef, relevant: bool) {
        entry.update_snapshot_flags(|f| {
            if relevant {
                f.set(Flags::RELEVANT)
            } else {
                f.clear(Flags::RELEVANT)
            }
        });
    }

    pub fn is_relevant(&self, entry: &EntryRef) -> bool {
        entry.snapshot_flags().contains(Flags::RELEVANT)
    }

    pub fn is_new(&self, entry: &EntryRef) -> bool {
        entry.snapshot_flags().contains(Flags::NEW)
    }

    /// Schedule this entry's NEW flag to be cleared by the next sweep.
    pub fn set_clear_new(&self, entry: &EntryRef) {
        entry.update_snapshot_flags(|f| f.set(Flags::CLEAR_NEW));
    }

    pub fn needs_new_clear(&self, entry: &EntryRef) -> bool {
        entry.snapshot_flags().contains(Flags::CLEAR_NEW)
    }

    pub fn clear_new(&self, entry: &EntryRef) {
        entry.update_snapshot_flags(|f| {
            f.clear(Flags::NEW);
            f.clear(Flags::CLEAR_NEW);
        });
    }

    /// Post-snapshot pass: clear NEW wherever a clear was scheduled.
    pub fn sweep_cleared_newness(&self) {
        walk(&self.root, &mut |entry| {
            if entry.snapshot_flags().contains(Flags::CLEAR_NEW) {
                self.clear_new(entry);
            }
        });
    }

    /// Tombstone a namespace. Only legal once its NEW flag has been
    /// cleared by a scan; anything else is a caller bug.
    pub fn set_deleted(&self, entry: &EntryRef) -> Result<()> {
        let Some(flags) = entry.flags() else {
            error!(name = entry.name(), "set_deleted on a resource entry");
            return Err(Error::BadParameter("only namespaces can be tombstoned".to_string()));
        };
        if flags.contains(Flags::NEW) {
            error!(name = entry.name(), "set_deleted on an entry still marked new");
            return Err(Error::BadParameter("entry is still marked new".to_string()));
        }
        entry.update_snapshot_flags(|f| f.set(Flags::DELETED));
        let mut zombies = self.zombies.borrow_mut();
        if !zombies.iter().any(|z| Rc::ptr_eq(z, entry)) {
            zombies.push(Rc::clone(entry));
        }
        Ok(())
    }

    /// Drop flushed tombstones. From here an entry survives only
    /// through descendants or live external handles.
    pub fn flush_deleted(&self) {
        let flushed: Vec<EntryRef> = {
            let mut zombies = self.zombies.borrow_mut();
            let mut kept = Vec::new();
            let mut out = Vec::new();
            for entry in zombies.drain(..) {
                if entry.is_deleted() {
                    out.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            *zombies = kept;
            out
        };
        for entry in flushed {
            debug!(name = entry.name(), "flushing tombstone");
            drop(entry);
        }
    }

    // ========================================================================
    // Change listeners
    // ========================================================================

    pub fn add_change_listener(&self, listener: impl Fn(&ChangeEvent) + 'static) -> WatchHandle {
        self.listeners.add(Rc::new(listener) as ChangeListener)
    }

    pub fn remove_change_listener(&self, handle: WatchHandle) {
        self.listeners.remove(handle);
    }

    fn notify(&self, entry: &EntryRef, kind: EntryKind, op: ChangeOp) {
        let path = match self.get_path(&self.root, entry) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "skipping change notification, entry has no printable path");
                return;
            }
        };
        let event = ChangeEvent { path, kind, op };
        debug!(path = event.path.as_str(), kind = %event.kind, op = %event.op, "resource change");
        self.listeners.notify(&event);
    }
}

/// Pre-order walk over every entry, tombstones included.
fn walk(entry: &EntryRef, f: &mut impl FnMut(&EntryRef)) {
    f(entry);
    for child in entry.children_snapshot(true) {
        walk(&child, f);
    }
}

/// True when the entry sits under the root's observation namespace.
fn under_observation_namespace(entry: &EntryRef) -> bool {
    let mut current = Rc::clone(entry);
    loop {
        let Some(parent) = current.parent().cloned() else {
            return false;
        };
        if parent.is_root() && current.name() == OBSERVATION_NAMESPACE {
            return true;
        }
        current = parent;
    }
}
