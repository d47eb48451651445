//! `upd`: an in-process, content-addressable object runtime.
//!
//! An [`Iso`] owns a graph of reference-counted "files", each bound to a
//! [`Driver`] that interprets a typed request/response bus. Files are
//! watched, not polled: deletion, mutation, and cross-thread completion are
//! all delivered as events to registered watchers. The loop itself is
//! single-threaded and cooperative (see [`Iso::tick`]/[`Iso::run_until_idle`]);
//! drivers that need real concurrency hand work to a worker thread and
//! report back through [`iso::AsyncHandle`].

pub mod arena;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod file;
pub mod iso;
pub mod path;
pub mod request;

pub use driver::{Driver, Registry};
pub use error::ReqResult;
pub use file::{FileEvent, FileId, LockId, WatchId};
pub use iso::{AsyncHandle, ExitStatus, Iso};
pub use path::{pathfind, pathfind_with_dup, PathfindResult};
pub use request::{
    Completion, DirAccess, DirEntry, ProgAccess, ReqCategory, ReqType, Request, RequestPayload,
    StreamAccess, TensorMeta, TensorType,
};
