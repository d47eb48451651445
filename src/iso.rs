//! The isolated machine: the file table, driver registry, scratch arena,
//! lock/watch bookkeeping, and the single-threaded event loop that drains
//! deferred callbacks and cross-thread async triggers.
//!
//! Grounded on `original_source/include/libupd.h`'s `upd_iso_t` opaque
//! handle and its free functions (`upd_iso_stack`/`unstack`/`msg`/`exit`,
//! `upd_file_new`/`get`/`ref`/`unref`/`watch`/`unwatch`, `upd_req`) for the
//! operation set, and on `compio-runtime`'s scheduler (`runtime/mod.rs`,
//! `runtime/scheduler/mod.rs`) for the idiom: a single-threaded reactor
//! holding a `Slab`-backed table behind an `Rc<RefCell<_>>` rather than the
//! original's raw pointers and manual refcounting.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::arena::{Arena, StackFrame};
use crate::driver::{Driver, Registry};
use crate::error::ReqResult;
use crate::file::{FileEvent, FileId, LockId, WatchId};
use crate::request::{Completion, Request};

/// Exit status requested via [`Iso::exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitStatus {
    /// An internal invariant was violated. Pending callbacks are not drained.
    Panic = -1,
    /// Clean shutdown.
    Shutdown = 0,
    /// Clean shutdown, host should restart the `Iso`.
    Reboot = 1,
}

enum FileState {
    Live,
    /// `deinit` has been called (or is being called); the file is no longer
    /// reachable via [`Iso::file_exists`] and must not receive new requests.
    Tearing,
}

struct WatchEntry {
    id: WatchId,
    cb: RefCell<Box<dyn FnMut(&Iso, FileId, FileEvent)>>,
}

struct LockWaiter {
    id: LockId,
    exclusive: bool,
    granted: bool,
    cb: Option<Box<dyn FnOnce(&Iso, LockId, bool)>>,
}

struct FileSlot {
    driver: Rc<dyn Driver>,
    ctx: RefCell<Box<dyn Any>>,
    refcount: Cell<u64>,
    state: Cell<FileState>,
    watchers: RefCell<Vec<Option<Rc<WatchEntry>>>>,
    next_watch_id: Cell<u64>,
    lock_queue: RefCell<VecDeque<LockWaiter>>,
    next_lock_id: Cell<u64>,
}

impl FileSlot {
    fn new(driver: Rc<dyn Driver>, ctx: Box<dyn Any>) -> Self {
        Self {
            driver,
            ctx: RefCell::new(ctx),
            refcount: Cell::new(1),
            state: Cell::new(FileState::Live),
            watchers: RefCell::new(Vec::new()),
            next_watch_id: Cell::new(0),
            lock_queue: RefCell::new(VecDeque::new()),
            next_lock_id: Cell::new(0),
        }
    }
}

/// Wakeup primitive shared with worker threads started via [`Iso::start_thread`].
///
/// This is the redesign called for in SPEC_FULL.md §9: a bounded
/// producer/consumer signal (a lock-free queue plus a condvar) instead of the
/// source's spin-on-atomic-flags pattern. It is the only channel a worker
/// thread is allowed to use to reach back into the `Iso` loop.
#[derive(Clone)]
pub struct AsyncHandle {
    queue: Arc<SegQueue<FileId>>,
    wake: Arc<(Mutex<bool>, Condvar)>,
}

impl AsyncHandle {
    /// Thread-safe equivalent of `file_trigger_async`: schedule an `Async`
    /// watch event for `file` to be delivered on the `Iso` loop.
    pub fn trigger(&self, file: FileId) {
        self.queue.push(file);
        let (lock, cv) = &*self.wake;
        let mut pending = lock.lock().unwrap();
        *pending = true;
        cv.notify_all();
    }
}

struct IsoInner {
    files: RefCell<Slab<Rc<FileSlot>>>,
    drivers: RefCell<Registry>,
    arena: Arena,
    async_queue: Arc<SegQueue<FileId>>,
    async_wake: Arc<(Mutex<bool>, Condvar)>,
    deferred: RefCell<VecDeque<Box<dyn FnOnce(&Iso)>>>,
    exit: Cell<Option<ExitStatus>>,
    messages: RefCell<VecDeque<String>>,
    workers: RefCell<Vec<JoinHandle<()>>>,
}

/// The isolated machine. Process-scoped runtime context owning the file
/// table, driver registry, scratch arena, worker-thread handles and exit
/// status.
///
/// `Iso` is a cheap `Rc` clone: the whole substrate is single-threaded
/// (matching `compio_runtime::Runtime`, which is likewise `!Send` and driven
/// from one thread), with [`AsyncHandle`] as the sanctioned way for worker
/// threads started by [`Iso::start_thread`] to reach back in.
#[derive(Clone)]
pub struct Iso(Rc<IsoInner>);

impl Iso {
    /// Create a fresh, empty isolated machine.
    pub fn new() -> Self {
        Self(Rc::new(IsoInner {
            files: RefCell::new(Slab::new()),
            drivers: RefCell::new(Registry::new()),
            arena: Arena::new(),
            async_queue: Arc::new(SegQueue::new()),
            async_wake: Arc::new((Mutex::new(false), Condvar::new())),
            deferred: RefCell::new(VecDeque::new()),
            exit: Cell::new(None),
            messages: RefCell::new(VecDeque::new()),
            workers: RefCell::new(Vec::new()),
        }))
    }

    // ---- driver registry ----------------------------------------------

    /// Register a driver. Returns `false` if its name is already taken.
    pub fn register_driver(&self, driver: Rc<dyn Driver>) -> bool {
        let name = driver.name();
        let ok = self.0.drivers.borrow_mut().register(driver);
        if ok {
            debug!(name, "driver registered");
        } else {
            warn!(name, "driver name already registered");
        }
        ok
    }

    pub fn lookup_driver(&self, name: &str) -> Option<Rc<dyn Driver>> {
        self.0.drivers.borrow().lookup(name)
    }

    // ---- file graph -----------------------------------------------------

    /// `file_new`: allocate a file bound to `driver`, running its `init`.
    /// Returns `None` if `init` fails; no file is left behind in that case.
    pub fn new_file(&self, driver: Rc<dyn Driver>, param: &str) -> Option<FileId> {
        let reserved = self.0.files.borrow_mut().insert(Rc::new(FileSlot::new(
            driver.clone(),
            Box::new(()),
        )));
        let id = FileId(reserved as u64);
        match driver.init(self, id, param) {
            Some(ctx) => {
                let slot = self.slot(id).expect("just inserted");
                *slot.ctx.borrow_mut() = ctx;
                trace!(file = id.0, driver = driver.name(), "file created");
                Some(id)
            }
            None => {
                self.0.files.borrow_mut().remove(reserved);
                warn!(driver = driver.name(), "file init failed");
                None
            }
        }
    }

    fn slot(&self, id: FileId) -> Option<Rc<FileSlot>> {
        self.0.files.borrow().get(id.index()).cloned()
    }

    fn live_slot(&self, id: FileId) -> Option<Rc<FileSlot>> {
        let slot = self.slot(id)?;
        match slot.state.get() {
            FileState::Live => Some(slot),
            FileState::Tearing => None,
        }
    }

    /// `file_get`: whether `id` currently denotes a live file (not mid-teardown).
    pub fn file_exists(&self, id: FileId) -> bool {
        self.live_slot(id).is_some()
    }

    pub fn driver_name(&self, id: FileId) -> Option<&'static str> {
        self.live_slot(id).map(|s| s.driver.name())
    }

    pub fn refcount(&self, id: FileId) -> Option<u64> {
        self.live_slot(id).map(|s| s.refcount.get())
    }

    /// Access this file's driver-private context.
    pub fn with_ctx<T: 'static, R>(&self, id: FileId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = self.live_slot(id)?;
        let mut ctx = slot.ctx.borrow_mut();
        let typed = ctx.downcast_mut::<T>()?;
        Some(f(typed))
    }

    /// `file_ref`: increment the refcount. Panics if the file was already
    /// torn down (resurrection is forbidden: deletion is terminal).
    pub fn file_ref(&self, id: FileId) {
        let slot = self
            .live_slot(id)
            .expect("file_ref on a file that is not live");
        let next = slot
            .refcount
            .get()
            .checked_add(1)
            .expect("file refcount overflow");
        slot.refcount.set(next);
    }

    /// `file_unref`: decrement the refcount; at zero, runs deinit and fans
    /// out `DELETE` to watchers before freeing the slot.
    pub fn file_unref(&self, id: FileId) {
        let Some(slot) = self.live_slot(id) else {
            return;
        };
        let remaining = slot.refcount.get().saturating_sub(1);
        slot.refcount.set(remaining);
        if remaining > 0 {
            return;
        }
        slot.state.set(FileState::Tearing);

        // Fail every outstanding lock waiter; granted holders already
        // consumed their callback at grant time.
        let waiters: Vec<LockWaiter> = slot.lock_queue.borrow_mut().drain(..).collect();
        for w in waiters {
            let wid = w.id;
            if let Some(cb) = w.cb {
                cb(self, wid, false);
            }
        }

        let driver = slot.driver.clone();
        let ctx = std::mem::replace(&mut *slot.ctx.borrow_mut(), Box::new(()));
        driver.deinit(self, id, ctx);
        trace!(file = id.0, driver = driver.name(), "file deinit complete");

        self.trigger(id, FileEvent::Delete);

        // Drop the watcher/lock-queue storage but deliberately leave the
        // slab slot occupied: ids are never recycled within an `Iso`'s
        // lifetime (SPEC_FULL.md §9), and `Slab::remove` would free the
        // index for a future `insert` to reuse. `file_exists`/`with_ctx`
        // already treat a `Tearing` slot as absent, so watchers calling back
        // into the graph during DELETE never observe a half-freed file.
        slot.watchers.borrow_mut().clear();
        slot.lock_queue.borrow_mut().clear();
    }

    // ---- watches ----------------------------------------------------------

    /// `file_watch`: register a callback for `Delete`/`Update`/`Async` events
    /// on `id`. Returns `None` if the file does not exist.
    pub fn watch(
        &self,
        id: FileId,
        cb: impl FnMut(&Iso, FileId, FileEvent) + 'static,
    ) -> Option<WatchId> {
        let slot = self.live_slot(id)?;
        let wid = WatchId(slot.next_watch_id.get());
        slot.next_watch_id.set(wid.0 + 1);
        slot.watchers.borrow_mut().push(Some(Rc::new(WatchEntry {
            id: wid,
            cb: RefCell::new(Box::new(cb)),
        })));
        Some(wid)
    }

    /// `file_unwatch`. No-op if the file or watch is already gone.
    pub fn unwatch(&self, id: FileId, watch: WatchId) {
        let Some(slot) = self.slot(id) else { return };
        let mut watchers = slot.watchers.borrow_mut();
        if let Some(slot_entry) = watchers.iter_mut().find(|e| {
            e.as_ref().map(|e| e.id) == Some(watch)
        }) {
            *slot_entry = None;
        }
    }

    /// `file_trigger`: synchronous fan-out, in registration order. Watchers
    /// registered by a callback invoked during this dispatch are not
    /// notified of the in-flight event — only the length snapshotted before
    /// dispatch began is walked.
    pub fn trigger(&self, id: FileId, event: FileEvent) {
        let Some(slot) = self.slot(id) else { return };
        let len = slot.watchers.borrow().len();
        for i in 0..len {
            let entry = slot.watchers.borrow().get(i).cloned().flatten();
            if let Some(entry) = entry {
                let mut cb = entry.cb.borrow_mut();
                (cb)(self, id, event);
            }
        }
    }

    /// Thread-safe handle usable from a worker spawned by [`Iso::start_thread`]
    /// to schedule an `Async` event back onto this loop.
    pub fn async_handle(&self) -> AsyncHandle {
        AsyncHandle {
            queue: self.0.async_queue.clone(),
            wake: self.0.async_wake.clone(),
        }
    }

    /// `file_trigger_async` called directly from the `Iso` thread (mostly
    /// useful in tests); prefer [`AsyncHandle::trigger`] from a worker.
    pub fn trigger_async(&self, id: FileId) {
        self.async_handle().trigger(id);
    }

    // ---- request bus --------------------------------------------------

    /// `upd_req`: route `req` to its target file's driver.
    ///
    /// On `Ok(())` the driver has taken ownership of `callback` and will
    /// invoke it exactly once. On `Err(result)` the callback was dropped
    /// unused and `result` is the failure reason — mirrors the source's
    /// "`upd_req` returns false, `cb` not invoked, `result` holds the
    /// reason".
    pub fn submit(&self, req: Request, callback: Completion) -> Result<(), ReqResult> {
        let Some(slot) = self.live_slot(req.file) else {
            return Err(ReqResult::Invalid);
        };
        let driver = slot.driver.clone();
        if !driver.categories().contains(&req.ty.category()) {
            return Err(ReqResult::Invalid);
        }
        match driver.handle(self, req.file, req, callback) {
            Ok(()) => Ok(()),
            Err((result, _unused_callback)) => Err(result),
        }
    }

    // ---- lock manager ------------------------------------------------

    /// `file_lock`: enqueue a shared or exclusive lock request.
    ///
    /// Grant rule: a queued exclusive lock is granted alone once it reaches
    /// the front; a queued shared lock is granted together with every
    /// contiguous shared waiter behind it once the front is clear of
    /// exclusive holders. Grants may happen synchronously, inline, before
    /// this call returns.
    ///
    /// `cb` receives its own [`LockId`] (mirroring the source's lock record
    /// being passed back to its own callback) so a granted holder can call
    /// [`Iso::unlock`] without having captured the id returned from this
    /// call — useful since a grant can fire synchronously, before `lock`
    /// has returned that id to the caller.
    pub fn lock(
        &self,
        id: FileId,
        exclusive: bool,
        cb: impl FnOnce(&Iso, LockId, bool) + 'static,
    ) -> Option<LockId> {
        let slot = self.live_slot(id)?;
        let lid = LockId(slot.next_lock_id.get());
        slot.next_lock_id.set(lid.0 + 1);
        slot.lock_queue.borrow_mut().push_back(LockWaiter {
            id: lid,
            exclusive,
            granted: false,
            cb: Some(Box::new(cb)),
        });
        self.grant_pending(id);
        Some(lid)
    }

    /// `file_unlock`: release a granted lock, or cancel a queued one
    /// (delivering `ok=false` to its callback). Exactly one call per `lock`
    /// id: granted or queued, never both.
    pub fn unlock(&self, id: FileId, lock: LockId) {
        let Some(slot) = self.slot(id) else { return };
        let cancelled_cb = {
            let mut queue = slot.lock_queue.borrow_mut();
            if let Some(pos) = queue.iter().position(|w| w.id == lock) {
                let w = queue.remove(pos).unwrap();
                if w.granted {
                    None
                } else {
                    w.cb
                }
            } else {
                None
            }
        };
        if let Some(cb) = cancelled_cb {
            cb(self, lock, false);
        }
        self.grant_pending(id);
    }

    fn grant_pending(&self, id: FileId) {
        let Some(slot) = self.slot(id) else { return };
        let to_grant: Vec<LockId> = {
            let queue = slot.lock_queue.borrow();
            let mut idx = 0;
            while idx < queue.len() && queue[idx].granted {
                idx += 1;
            }
            if idx >= queue.len() {
                Vec::new()
            } else if idx > 0 && queue[0].exclusive {
                // an exclusive holder is active; nobody else may be granted
                Vec::new()
            } else if queue[idx].exclusive {
                if idx == 0 {
                    vec![queue[idx].id]
                } else {
                    Vec::new()
                }
            } else {
                let mut v = Vec::new();
                let mut j = idx;
                while j < queue.len() && !queue[j].granted && !queue[j].exclusive {
                    v.push(queue[j].id);
                    j += 1;
                }
                v
            }
        };
        if to_grant.is_empty() {
            return;
        }
        for gid in &to_grant {
            let mut queue = slot.lock_queue.borrow_mut();
            if let Some(w) = queue.iter_mut().find(|w| w.id == *gid) {
                w.granted = true;
            }
        }
        for gid in &to_grant {
            let cb = {
                let mut queue = slot.lock_queue.borrow_mut();
                queue.iter_mut().find(|w| w.id == *gid).and_then(|w| w.cb.take())
            };
            if let Some(cb) = cb {
                cb(self, *gid, true);
            }
        }
    }

    // ---- scratch arena --------------------------------------------------

    pub fn stack<T>(&self, value: T) -> StackFrame<T> {
        self.0.arena.stack(value)
    }

    pub fn unstack<T>(&self, frame: StackFrame<T>) -> T {
        self.0.arena.unstack(frame)
    }

    // ---- diagnostics / exit --------------------------------------------

    /// `iso_msg`/`iso_msgf`: line-oriented diagnostics tagged with a
    /// per-driver prefix. Emitted as a `tracing` event and also retained in
    /// a ring buffer so embedders/tests without a subscriber installed can
    /// still observe them via [`Iso::drain_messages`].
    pub fn msg(&self, prefix: &str, text: impl std::fmt::Display) {
        let line = format!("{prefix}{text}");
        debug!(target: "upd::msg", "{line}");
        let mut messages = self.0.messages.borrow_mut();
        messages.push_back(line);
        while messages.len() > 1024 {
            messages.pop_front();
        }
    }

    pub fn drain_messages(&self) -> Vec<String> {
        self.0.messages.borrow_mut().drain(..).collect()
    }

    pub fn exit(&self, status: ExitStatus) {
        self.0.exit.set(Some(status));
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.0.exit.get()
    }

    /// Schedule `f` to run on a future [`Iso::tick`], on this thread.
    pub fn defer(&self, f: impl FnOnce(&Iso) + 'static) {
        self.0.deferred.borrow_mut().push_back(Box::new(f));
    }

    /// `iso_start_thread`: spawn a worker thread. The worker receives an
    /// [`AsyncHandle`] and must use only that (plus whatever `Send` state the
    /// caller captures) to communicate back; it must never touch the file
    /// graph, the driver registry, or the scratch arena directly.
    pub fn start_thread(&self, f: impl FnOnce(AsyncHandle) + Send + 'static) {
        let handle = self.async_handle();
        let join = std::thread::spawn(move || f(handle));
        self.0.workers.borrow_mut().push(join);
    }

    /// Drain one batch of ready work: deferred callbacks and any `Async`
    /// events signalled by worker threads since the last tick. Returns
    /// `true` if there may be more work (so the host should call `tick`
    /// again without waiting).
    pub fn tick(&self) -> bool {
        if matches!(self.exit_status(), Some(ExitStatus::Panic)) {
            return false;
        }
        {
            let (lock, _cv) = &*self.0.async_wake;
            *lock.lock().unwrap() = false;
        }
        while let Some(file) = self.0.async_queue.pop() {
            self.trigger(file, FileEvent::Async);
        }
        let ready: Vec<_> = self.0.deferred.borrow_mut().drain(..).collect();
        for f in ready {
            if matches!(self.exit_status(), Some(ExitStatus::Panic)) {
                return false;
            }
            f(self);
        }
        self.exit_status().is_none()
            && (!self.0.async_queue.is_empty() || !self.0.deferred.borrow().is_empty())
    }

    /// Drive [`Iso::tick`] until both queues are empty or exit is pending.
    /// Does not block waiting for external/worker-thread signals; a host
    /// embedding a real event loop should instead block on the condvar
    /// behind [`Iso::async_handle`] between calls.
    pub fn run_until_idle(&self) {
        while self.exit_status().is_none() && self.tick() {}
    }

    /// Block until a worker thread signals via [`AsyncHandle::trigger`], a
    /// deferred callback is pending, or `timeout` elapses, then run one
    /// [`Iso::tick`].
    pub fn wait_tick(&self, timeout: std::time::Duration) -> bool {
        let (lock, cv) = &*self.0.async_wake;
        let guard = lock.lock().unwrap();
        if !*guard && self.0.deferred.borrow().is_empty() {
            let _ = cv.wait_timeout(guard, timeout);
        }
        self.tick()
    }
}

impl Default for Iso {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Iso {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iso")
            .field("files", &self.0.files.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::request::{ReqType, Request, RequestPayload};

    /// A driver with no categories and a counted `deinit`, just enough to
    /// exercise the file graph (refcounting, watch fan-out) without pulling
    /// in any concrete driver module.
    struct CountingDriver {
        deinits: Rc<Cell<u32>>,
    }

    impl Driver for CountingDriver {
        fn name(&self) -> &'static str {
            "test.counting"
        }

        fn categories(&self) -> &'static [crate::request::ReqCategory] {
            &[]
        }

        fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
            Some(Box::new(()))
        }

        fn deinit(&self, _iso: &Iso, _file: FileId, _ctx: Box<dyn Any>) {
            self.deinits.set(self.deinits.get() + 1);
        }

        fn handle(
            &self,
            _iso: &Iso,
            _file: FileId,
            _req: Request,
            callback: Completion,
        ) -> Result<(), (ReqResult, Completion)> {
            Err((ReqResult::Invalid, callback))
        }
    }

    #[test]
    fn refcount_delete_fanout_in_registration_order() {
        let iso = Iso::new();
        let deinits = Rc::new(Cell::new(0));
        let driver = Rc::new(CountingDriver {
            deinits: deinits.clone(),
        });
        let a = iso.new_file(driver, "").unwrap();

        let order = Rc::new(RefCell::new(Vec::new()));
        for watcher_id in [1, 2, 3] {
            let order = order.clone();
            iso.watch(a, move |_, _, event| {
                assert_eq!(event, FileEvent::Delete);
                order.borrow_mut().push(watcher_id);
            });
        }

        assert_eq!(iso.refcount(a), Some(1));
        iso.file_unref(a);

        assert_eq!(deinits.get(), 1, "deinit must run exactly once");
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        assert!(!iso.file_exists(a), "storage must be torn down after unref to zero");
    }

    #[test]
    fn lock_ordering_exclusive_then_shared_pair_then_exclusive() {
        let iso = Iso::new();
        let driver = Rc::new(CountingDriver {
            deinits: Rc::new(Cell::new(0)),
        });
        let f = iso.new_file(driver, "").unwrap();

        let grants: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let g = grants.clone();
        let l1 = iso
            .lock(f, true, move |_, _, ok| {
                assert!(ok);
                g.borrow_mut().push("L1");
            })
            .unwrap();

        // L1 is exclusive and alone: granted synchronously, immediately.
        assert_eq!(*grants.borrow(), vec!["L1"]);

        let g = grants.clone();
        let l2 = iso
            .lock(f, false, move |_, _, ok| {
                assert!(ok);
                g.borrow_mut().push("L2");
            })
            .unwrap();
        let g = grants.clone();
        let l3 = iso
            .lock(f, false, move |_, _, ok| {
                assert!(ok);
                g.borrow_mut().push("L3");
            })
            .unwrap();

        // L2/L3 are queued behind the held exclusive L1; not yet granted.
        assert_eq!(*grants.borrow(), vec!["L1"]);

        let g = grants.clone();
        let l4 = iso
            .lock(f, true, move |_, _, ok| {
                assert!(ok);
                g.borrow_mut().push("L4");
            })
            .unwrap();
        assert_eq!(*grants.borrow(), vec!["L1"]);

        iso.unlock(f, l1);
        // Both shared waiters are granted together, L4 still waits behind them.
        assert_eq!(*grants.borrow(), vec!["L1", "L2", "L3"]);

        iso.unlock(f, l2);
        assert_eq!(*grants.borrow(), vec!["L1", "L2", "L3"], "L4 waits for both shared holders");

        iso.unlock(f, l3);
        assert_eq!(*grants.borrow(), vec!["L1", "L2", "L3", "L4"]);

        iso.unlock(f, l4);
    }

    #[test]
    fn submit_to_unknown_category_is_invalid() {
        let iso = Iso::new();
        let driver = Rc::new(CountingDriver {
            deinits: Rc::new(Cell::new(0)),
        });
        let f = iso.new_file(driver, "").unwrap();
        let req = Request::new(f, ReqType::DirList, RequestPayload::DirList(Vec::new()));
        let result = iso.submit(req, Completion::new(|_, _, _, _| panic!("must not run")));
        assert_eq!(result, Err(ReqResult::Invalid));
    }
}
