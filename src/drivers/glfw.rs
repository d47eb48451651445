//! `upd.graphics.glfw.dev` / `upd.graphics.glfw.dev.thread_`: the
//! worker-thread driver pattern from SPEC_FULL.md §4.9, exercised against a
//! stub "native call" standing in for a real GLFW/GL3 binding.
//!
//! Grounded on `original_source/drivers/graphics/glfw_dev.c`: a visible
//! `upd.graphics.glfw.dev` file whose `init` spawns exactly one OS thread and
//! a hidden `upd.graphics.glfw.dev.thread_` file (`cats = {0}` on both —
//! neither accepts a single request over the bus, matching `dev_handle_`/
//! `thread_handle_` which both unconditionally `return false`); a
//! process-scoped `atomic_flag glfw_busy_` cleared only by the *thread* file's
//! `deinit` (`thread_deinit_`), never the dev file's. The source's spin on
//! `ctx->done` plus three more atomics (`thread_alive`, `file_alive`) is
//! replaced per the redesign in §9 with a bounded `std::sync::mpsc` channel:
//! the worker blocks on `recv_timeout` instead of spinning, and channel
//! disconnection (the dev file dropping its sender on deinit) is what tells
//! the worker to stop, instead of polling `file_alive`.

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::driver::Driver;
use crate::error::ReqResult;
use crate::file::FileId;
use crate::iso::Iso;
use crate::request::{Completion, ReqCategory, Request};

/// One process may run at most one GLFW device at a time (a real binding
/// would own a single GL context); enforced the same way the source enforces
/// it, with an atomic flag instead of `atomic_flag_test_and_set`.
static GLFW_BUSY: AtomicBool = AtomicBool::new(false);

/// The stub "native call" a real binding would replace with GLFW/GL3 calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlfwOp {
    /// Stands in for `GRA_GLFW_REQ_GL3_INIT`: "create" a window of the given
    /// width, responds with the same value (a real binding would hand back a
    /// window handle).
    WindowInit(i64),
    /// Stands in for `GRA_GLFW_REQ_GL3_DEINIT`: "destroy" a window.
    WindowDeinit(i64),
}

struct Shared {
    responses: Mutex<VecDeque<(ReqResult, GlfwOp)>>,
    thread_alive: AtomicBool,
}

type PendingCb = Box<dyn FnOnce(&Iso, ReqResult, GlfwOp)>;

struct DevCtx {
    tx: SyncSender<GlfwOp>,
    completions: VecDeque<PendingCb>,
}

/// The visible `upd.graphics.glfw.dev` file. Accepts no bus requests (same
/// empty `cats` as the source); callers reach the worker through
/// [`GlfwDriver::call`] instead, mirroring the source's bespoke
/// `gra_glfw_req_t` side channel rather than the `upd_req_t` bus.
pub struct GlfwDriver;

impl GlfwDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }

    /// Submit `op` to the worker thread owned by the GLFW device at `file`.
    /// `cb` is invoked exactly once, from the `Iso` loop, when the worker
    /// reports completion. Returns `false` (and never calls `cb`) if `file`
    /// is not a live GLFW device or its worker has already exited.
    pub fn call(
        iso: &Iso,
        file: FileId,
        op: GlfwOp,
        cb: impl FnOnce(&Iso, ReqResult, GlfwOp) + 'static,
    ) -> bool {
        iso.with_ctx::<DevCtx, bool>(file, |ctx| {
            if ctx.tx.send(op).is_err() {
                return false;
            }
            ctx.completions.push_back(Box::new(cb));
            true
        })
        .unwrap_or(false)
    }
}

impl Driver for GlfwDriver {
    fn name(&self) -> &'static str {
        "upd.graphics.glfw.dev"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        &[]
    }

    fn init(&self, iso: &Iso, file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        if GLFW_BUSY.swap(true, Ordering::AcqRel) {
            iso.msg(
                "upd.graphics.glfw.dev: ",
                "you cannot build two GLFW devices",
            );
            return None;
        }

        let thread_driver = iso
            .lookup_driver("upd.graphics.glfw.dev.thread_")
            .expect("upd.graphics.glfw.dev.thread_ must be registered alongside this driver");
        let Some(thread_file) = iso.new_file(thread_driver, "") else {
            GLFW_BUSY.store(false, Ordering::Release);
            iso.msg("upd.graphics.glfw.dev: ", "worker file allocation failure");
            return None;
        };

        let shared = Arc::new(Shared {
            responses: Mutex::new(VecDeque::new()),
            thread_alive: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::sync_channel::<GlfwOp>(16);

        iso.with_ctx::<ThreadCtx, ()>(thread_file, |ctx| {
            ctx.dev_file = Some(file);
            ctx.shared = Some(shared.clone());
        });
        let watch = iso.watch(thread_file, move |iso, _file, event| {
            if event == crate::file::FileEvent::Async {
                thread_async_cb(iso, thread_file);
            }
        });
        if watch.is_none() {
            iso.file_unref(thread_file);
            GLFW_BUSY.store(false, Ordering::Release);
            iso.msg("upd.graphics.glfw.dev: ", "self watch failure");
            return None;
        }

        let worker_shared = shared.clone();
        iso.start_thread(move |async_handle| {
            loop {
                match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(op) => {
                        let result = run_stub_native_call(op);
                        worker_shared
                            .responses
                            .lock()
                            .expect("glfw response queue poisoned")
                            .push_back((ReqResult::Ok, result));
                        async_handle.trigger(thread_file);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            worker_shared.thread_alive.store(false, Ordering::Release);
            async_handle.trigger(thread_file);
        });

        Some(Box::new(DevCtx {
            tx,
            completions: VecDeque::new(),
        }))
    }

    fn deinit(&self, iso: &Iso, _file: FileId, ctx: Box<dyn Any>) {
        let ctx = ctx.downcast::<DevCtx>().expect("glfw dev ctx type");
        // Dropping `tx` here disconnects the worker's receiver, which is the
        // signal (in place of the source's `file_alive` atomic) that tells
        // it to stop. Any call still in flight is failed rather than left to
        // complete against a dev file that no longer exists.
        for cb in ctx.completions {
            cb(iso, ReqResult::Aborted, GlfwOp::WindowDeinit(0));
        }
        drop(ctx.tx);
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

/// A stand-in for whatever a real binding would compute on its OS thread:
/// deterministic so tests can assert on it without touching real GL state.
fn run_stub_native_call(op: GlfwOp) -> GlfwOp {
    match op {
        GlfwOp::WindowInit(w) => GlfwOp::WindowInit(w),
        GlfwOp::WindowDeinit(w) => GlfwOp::WindowDeinit(w),
    }
}

#[derive(Default)]
struct ThreadCtx {
    dev_file: Option<FileId>,
    shared: Option<Arc<Shared>>,
}

/// The hidden `upd.graphics.glfw.dev.thread_` file. Exists only to own the
/// worker thread and receive its `Async` completions; like the dev file, it
/// accepts no bus requests.
pub struct GlfwThreadDriver;

impl GlfwThreadDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Driver for GlfwThreadDriver {
    fn name(&self) -> &'static str {
        "upd.graphics.glfw.dev.thread_"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        &[]
    }

    fn is_async(&self) -> bool {
        true
    }

    fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        Some(Box::new(ThreadCtx::default()))
    }

    fn deinit(&self, _iso: &Iso, _file: FileId, _ctx: Box<dyn Any>) {
        // The source clears `glfw_busy_` in `thread_deinit_`, not
        // `dev_deinit_`: the slot is only free for reuse once the worker's
        // own file is gone, not merely the visible device file.
        GLFW_BUSY.store(false, Ordering::Release);
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

/// Invoked on the `Iso` loop when the worker thread signals `Async` on
/// `thread_file`: dispatch at most one queued response to the dev file's
/// oldest pending [`GlfwDriver::call`], then, if the worker has exited,
/// release this file (mirrors `thread_handle_async_`'s
/// `upd_file_unref(f)` once `!thread_alive`).
fn thread_async_cb(iso: &Iso, thread_file: FileId) {
    let shared = iso.with_ctx::<ThreadCtx, Option<Arc<Shared>>>(thread_file, |ctx| ctx.shared.clone());
    let Some(Some(shared)) = shared else { return };

    let response = shared
        .responses
        .lock()
        .expect("glfw response queue poisoned")
        .pop_front();
    if let Some((result, op)) = response {
        let dev_file = iso.with_ctx::<ThreadCtx, Option<FileId>>(thread_file, |ctx| ctx.dev_file);
        if let Some(Some(dev_file)) = dev_file {
            iso.with_ctx::<DevCtx, ()>(dev_file, |ctx| {
                if let Some(cb) = ctx.completions.pop_front() {
                    cb(iso, result, op);
                }
            });
        }
    }

    if !shared.thread_alive.load(Ordering::Acquire) {
        iso.msg("upd.graphics.glfw.dev: ", "GLFW thread exited");
        iso.file_unref(thread_file);
    }
}
