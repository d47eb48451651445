use std::any::Any;

use crate::file::FileId;
use crate::iso::Iso;
use crate::request::{Completion, ReqCategory, Request};
use crate::error::ReqResult;

/// The behavior a [`crate::file::FileId`] is bound to.
///
/// This is the open-interface reimplementation of the source's
/// `{init, deinit, handle, cats, flags}` descriptor: a trait instead of a
/// struct of function pointers plus an opaque `void* ctx`. Each driver still
/// manages an opaque per-file context, but it is a `Box<dyn Any>` recovered
/// through [`Iso::with_ctx`] rather than a raw pointer.
pub trait Driver {
    /// Unique, case-sensitive, period-separated name, e.g. `"upd.dir"`.
    fn name(&self) -> &'static str;

    /// Request categories this driver accepts in [`Driver::handle`].
    fn categories(&self) -> &'static [ReqCategory];

    /// Whether this driver's operations may run on a worker thread. Drivers
    /// that set this are expected to manage their own thread and only touch
    /// the file graph from the `Iso` loop (see the worker-thread pattern in
    /// `drivers::glfw`).
    fn is_async(&self) -> bool {
        false
    }

    /// Construct the per-file context for a freshly allocated file. Returning
    /// `None` aborts [`Iso::new_file`] (the file is never made visible).
    fn init(&self, iso: &Iso, file: FileId, param: &str) -> Option<Box<dyn Any>>;

    /// Tear down the per-file context. Called exactly once, with refcount
    /// already at zero, before `DELETE` fans out to watchers.
    fn deinit(&self, iso: &Iso, file: FileId, ctx: Box<dyn Any>);

    /// Handle one request targeting `file`.
    ///
    /// On `Ok(())`, this driver takes ownership of `callback` and guarantees
    /// to invoke it exactly once (synchronously before returning, or later).
    /// On `Err((result, callback))`, the driver declines the request
    /// synchronously; `callback` must not have been, and must not ever be,
    /// invoked — [`Iso::submit`] drops it and surfaces `result` to the
    /// original caller directly.
    fn handle(
        &self,
        iso: &Iso,
        file: FileId,
        req: Request,
        callback: Completion,
    ) -> Result<(), (ReqResult, Completion)>;
}

/// A name → driver lookup table, scoped to one [`Iso`].
#[derive(Default)]
pub struct Registry {
    by_name: std::collections::HashMap<&'static str, std::rc::Rc<dyn Driver>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver`. Returns `false` if the name is already taken.
    pub fn register(&mut self, driver: std::rc::Rc<dyn Driver>) -> bool {
        if self.by_name.contains_key(driver.name()) {
            return false;
        }
        self.by_name.insert(driver.name(), driver);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<std::rc::Rc<dyn Driver>> {
        self.by_name.get(name).cloned()
    }
}
