//! `upd.prog.parallelism` / `upd.prog.parallelism.stream`: multiplex many
//! independent program sessions over one byte stream.
//!
//! Grounded on `original_source/src/driver/prog/parallelism.c`. Frames on the
//! wire are `id:u16 LE, size:u16 LE, payload[size]`; `size == 0` closes the
//! named session. Opening a session resolves its name with [`pathfind`]
//! starting from the `Iso` root (not from the multiplexed stream file
//! itself, which is a `Stream`-category file and could never be the base of
//! a `DIR_FIND` walk), takes a shared lock on the resolved program,
//! `PROG_EXEC`s it, and watches the resulting stream file for `Update` so
//! its output can be pumped back out framed the same way. Per-session input
//! is buffered up to
//! [`SESSION_BUFFER_MAX`] and the host's outgoing multiplexed buffer is
//! capped at [`OUTPUT_BUFFER_MAX`]; both caps mirror the source's
//! `upd_buf_t.max`.
//!
//! The state machine per session is: resolving name → locked on the target
//! program → executing it → running (watching `io` for output, pumping
//! buffered input) → closed.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::driver::Driver;
use crate::error::ReqResult;
use crate::file::{FileEvent, FileId, WatchId};
use crate::iso::Iso;
use crate::path::pathfind_with_dup;
use crate::request::{
    Completion, ProgAccess, ReqCategory, ReqType, Request, RequestPayload, StreamAccess,
};

/// Cap on a single session's buffered-but-not-yet-piped input.
pub const SESSION_BUFFER_MAX: usize = 8 * 1024 * 1024;
/// Cap on a stream file's buffered-but-not-yet-read multiplexed output.
pub const OUTPUT_BUFFER_MAX: usize = 8 * 1024 * 1024;

// ---- upd.prog.parallelism ----------------------------------------------

/// Factory half: every `PROG_EXEC` mints a fresh multiplexed stream file.
pub struct ParallelismProgDriver;

impl ParallelismProgDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Driver for ParallelismProgDriver {
    fn name(&self) -> &'static str {
        "upd.prog.parallelism"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        &[ReqCategory::Prog]
    }

    fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        Some(Box::new(()))
    }

    fn deinit(&self, _iso: &Iso, _file: FileId, _ctx: Box<dyn Any>) {}

    fn handle(
        &self,
        iso: &Iso,
        file: FileId,
        req: Request,
        callback: Completion,
    ) -> Result<(), (ReqResult, Completion)> {
        match req.ty {
            ReqType::ProgAccess => {
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::ProgAccess(ProgAccess { exec: true }),
                );
                Ok(())
            }
            ReqType::ProgExec => {
                let stream_driver = iso
                    .lookup_driver("upd.prog.parallelism.stream")
                    .expect("upd.prog.parallelism.stream must be registered alongside this driver");
                match iso.new_file(stream_driver, "") {
                    Some(stream_file) => {
                        callback.complete(
                            iso,
                            file,
                            ReqResult::Ok,
                            RequestPayload::ProgExec(Some(stream_file)),
                        );
                        // Drop the creation ref now that the caller has seen
                        // the file id: the caller takes its own ref if it
                        // wants to keep the file alive (mirrors the source's
                        // `upd_file_unref(f)` right after its own callback).
                        iso.file_unref(stream_file);
                        Ok(())
                    }
                    None => Err((ReqResult::Nomem, callback)),
                }
            }
            _ => Err((ReqResult::Invalid, callback)),
        }
    }
}

// ---- upd.prog.parallelism.stream ---------------------------------------

struct Session {
    id: u16,
    io: Option<FileId>,
    watch: Option<WatchId>,
    input: Vec<u8>,
    parsing: bool,
}

#[derive(Default)]
struct StreamCtx {
    sessions: Vec<Rc<RefCell<Session>>>,
    output: Vec<u8>,
}

fn find_session(iso: &Iso, host: FileId, id: u16) -> Option<Rc<RefCell<Session>>> {
    iso.with_ctx::<StreamCtx, Option<Rc<RefCell<Session>>>>(host, |ctx| {
        ctx.sessions.iter().find(|s| s.borrow().id == id).cloned()
    })
    .flatten()
}

fn take_session(iso: &Iso, host: FileId, id: u16) -> Option<Rc<RefCell<Session>>> {
    iso.with_ctx::<StreamCtx, Option<Rc<RefCell<Session>>>>(host, |ctx| {
        let pos = ctx.sessions.iter().position(|s| s.borrow().id == id)?;
        Some(ctx.sessions.remove(pos))
    })
    .flatten()
}

/// Append one framed chunk (`id`, `data`) to the host's outgoing multiplexed
/// buffer and fan out `Update`. Fragments payloads over 65535 bytes into
/// multiple frames, same as the source. A zero-length `data` still emits a
/// frame — that is the wire's session-close signal.
fn output_pipe(iso: &Iso, host: FileId, id: u16, data: &[u8]) {
    if data.len() > u16::MAX as usize {
        for chunk in data.chunks(u16::MAX as usize) {
            output_pipe(iso, host, id, chunk);
        }
        return;
    }
    let grew = iso
        .with_ctx::<StreamCtx, bool>(host, |ctx| {
            if ctx.output.len() + 4 + data.len() > OUTPUT_BUFFER_MAX {
                return false;
            }
            ctx.output.extend_from_slice(&id.to_le_bytes());
            ctx.output.extend_from_slice(&(data.len() as u16).to_le_bytes());
            ctx.output.extend_from_slice(data);
            true
        })
        .unwrap_or(false);
    if grew {
        iso.trigger(host, FileEvent::Update);
    } else {
        iso.msg("upd.prog.parallelism: ", "output buffer overflow");
    }
}

/// Tear a session down: drop it from the table, unwatch/unref its `io` file
/// if it had one, and emit a close frame to the peer. No-op if the session
/// is already gone.
fn session_delete(iso: &Iso, host: FileId, id: u16) {
    let Some(session) = take_session(iso, host, id) else {
        return;
    };
    output_pipe(iso, host, id, &[]);
    let (io, watch) = {
        let s = session.borrow();
        (s.io, s.watch)
    };
    if let (Some(io), Some(watch)) = (io, watch) {
        iso.unwatch(io, watch);
    }
    if let Some(io) = io {
        iso.file_unref(io);
    }
}

/// Begin resolving and executing a newly named session. Holds one refcount
/// on `host` for the duration of the async chain, released on every
/// terminal path (success or abort) — mirrors the source's single
/// `upd_file_ref(ctx->file)` taken in `stream_add_session_`.
fn add_session(iso: &Iso, host: FileId, id: u16, name: &str) {
    if find_session(iso, host, id).is_some() {
        output_pipe(iso, host, id, &[]);
        return;
    }
    let session = Rc::new(RefCell::new(Session {
        id,
        io: None,
        watch: None,
        input: Vec::new(),
        parsing: false,
    }));
    iso.with_ctx::<StreamCtx, ()>(host, |ctx| ctx.sessions.push(session.clone()));

    iso.file_ref(host);
    let iso_owned = iso.clone();
    pathfind_with_dup(iso, FileId::ROOT, name, move |iso, result, resolved| {
        if !result.is_ok() || !resolved.remainder.is_empty() {
            session_delete(iso, host, id);
            iso.file_unref(host);
            return;
        }
        let prog = resolved.base;
        iso.file_ref(prog);
        let iso_for_lock = iso_owned.clone();
        iso.lock(prog, false, move |iso, lock, ok| {
            if !ok {
                iso.file_unref(prog);
                session_delete(iso, host, id);
                iso.file_unref(host);
                return;
            }
            let req = Request::new(prog, ReqType::ProgExec, RequestPayload::ProgExec(None));
            let iso_for_exec = iso_for_lock.clone();
            let submitted = iso.submit(
                req,
                Completion::new(move |iso, _file, result, payload| {
                    iso.unlock(prog, lock);
                    iso.file_unref(prog);
                    let io = if result.is_ok() {
                        match payload {
                            RequestPayload::ProgExec(io) => io,
                            _ => None,
                        }
                    } else {
                        None
                    };
                    let Some(io) = io else {
                        session_delete(&iso_for_exec, host, id);
                        iso.file_unref(host);
                        return;
                    };
                    iso.file_ref(io);
                    let watch_host = host;
                    let watch = iso.watch(io, move |iso, _file, event| {
                        session_watch_cb(iso, watch_host, id, event);
                    });
                    let Some(watch) = watch else {
                        iso.file_unref(io);
                        session_delete(&iso_for_exec, host, id);
                        iso.file_unref(host);
                        return;
                    };
                    if let Some(session) = find_session(iso, host, id) {
                        let mut s = session.borrow_mut();
                        s.io = Some(io);
                        s.watch = Some(watch);
                    }
                    iso.file_unref(host);
                }),
            );
            if submitted.is_err() {
                iso.unlock(prog, lock);
                iso.file_unref(prog);
                session_delete(&iso_for_lock, host, id);
                iso.file_unref(host);
            }
        });
    });
}

fn session_watch_cb(iso: &Iso, host: FileId, id: u16, event: FileEvent) {
    match event {
        FileEvent::Delete => {
            // The child stream outlives its watch only while this session
            // holds a ref on it; deletion here means something upstream
            // freed it out from under us, which session_delete always
            // prevents by holding that ref. Treat it as a close.
            session_delete(iso, host, id);
        }
        FileEvent::Update => {
            let Some(session) = find_session(iso, host, id) else {
                return;
            };
            let io = match session.borrow().io {
                Some(io) => io,
                None => return,
            };
            iso.lock(io, true, move |iso, lock, ok| {
                if !ok {
                    session_delete(iso, host, id);
                    return;
                }
                let req = Request::new(io, ReqType::StreamOutput, RequestPayload::StreamOutput(Bytes::new()));
                let submitted = iso.submit(
                    req,
                    Completion::new(move |iso, _file, result, payload| {
                        iso.unlock(io, lock);
                        if result.is_ok() {
                            if let RequestPayload::StreamOutput(data) = payload {
                                if !data.is_empty() {
                                    output_pipe(iso, host, id, &data);
                                }
                            }
                        } else {
                            session_delete(iso, host, id);
                        }
                    }),
                );
                if submitted.is_err() {
                    iso.unlock(io, lock);
                    session_delete(iso, host, id);
                }
            });
        }
        FileEvent::Async => {}
    }
}

/// Pipe whatever is buffered in `session.input` into its `io` file, unless
/// a pipe for this session is already outstanding.
fn session_input_pipe(iso: &Iso, host: FileId, id: u16) {
    let Some(session) = find_session(iso, host, id) else {
        return;
    };
    let (io, already, pending) = {
        let s = session.borrow();
        (s.io, s.parsing, s.input.len())
    };
    if already || pending == 0 {
        return;
    }
    let Some(io) = io else { return };
    session.borrow_mut().parsing = true;

    iso.file_ref(host);
    iso.lock(io, true, move |iso, lock, ok| {
        if !ok {
            iso.file_unref(host);
            return;
        }
        let data = {
            let Some(session) = find_session(iso, host, id) else {
                iso.unlock(io, lock);
                iso.file_unref(host);
                return;
            };
            Bytes::copy_from_slice(&session.borrow().input)
        };
        let req = Request::new(io, ReqType::StreamInput, RequestPayload::StreamInput(data));
        let submitted = iso.submit(
            req,
            Completion::new(move |iso, _file, result, payload| {
                iso.unlock(io, lock);
                if !result.is_ok() {
                    session_delete(iso, host, id);
                    iso.file_unref(host);
                    return;
                }
                let consumed = match payload {
                    RequestPayload::StreamInput(consumed) => consumed.len(),
                    _ => 0,
                };
                let Some(session) = find_session(iso, host, id) else {
                    iso.file_unref(host);
                    return;
                };
                let retry = {
                    let mut s = session.borrow_mut();
                    s.parsing = false;
                    s.input.drain(0..consumed.min(s.input.len()));
                    !s.input.is_empty()
                };
                if retry {
                    session_input_pipe(iso, host, id);
                }
                iso.file_unref(host);
            }),
        );
        if submitted.is_err() {
            iso.unlock(io, lock);
            session_delete(iso, host, id);
            iso.file_unref(host);
        }
    });
}

/// Parse the wire format out of one `STREAM_INPUT` payload, dispatching a
/// frame at a time. Returns how many leading bytes were consumed — trailing
/// bytes that don't form a whole frame are left for the next call.
fn stream_input(iso: &Iso, host: FileId, buf: &[u8]) -> usize {
    let mut rem = buf;
    let mut consumed = 0;
    while rem.len() >= 4 {
        let id = u16::from_le_bytes([rem[0], rem[1]]);
        let size = u16::from_le_bytes([rem[2], rem[3]]) as usize;
        let whole = 4 + size;
        if rem.len() < whole {
            break;
        }
        let payload = &rem[4..whole];
        match find_session(iso, host, id) {
            None => {
                let name = String::from_utf8_lossy(payload).into_owned();
                add_session(iso, host, id, &name);
            }
            Some(session) => {
                if size == 0 {
                    session_delete(iso, host, id);
                } else {
                    let overflow = {
                        let mut s = session.borrow_mut();
                        if s.input.len() + payload.len() > SESSION_BUFFER_MAX {
                            true
                        } else {
                            s.input.extend_from_slice(payload);
                            false
                        }
                    };
                    if overflow {
                        iso.msg("upd.prog.parallelism: ", "session buffer allocation failure");
                        session_delete(iso, host, id);
                    } else {
                        session_input_pipe(iso, host, id);
                    }
                }
            }
        }
        rem = &rem[whole..];
        consumed += whole;
    }
    consumed
}

pub struct ParallelismStreamDriver;

impl ParallelismStreamDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Driver for ParallelismStreamDriver {
    fn name(&self) -> &'static str {
        "upd.prog.parallelism.stream"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        &[ReqCategory::Stream]
    }

    fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        Some(Box::new(StreamCtx::default()))
    }

    fn deinit(&self, iso: &Iso, _file: FileId, ctx: Box<dyn Any>) {
        let ctx = ctx.downcast::<StreamCtx>().expect("parallelism stream ctx type");
        for session in ctx.sessions {
            let (io, watch) = {
                let s = session.borrow();
                (s.io, s.watch)
            };
            if let (Some(io), Some(watch)) = (io, watch) {
                iso.unwatch(io, watch);
            }
            if let Some(io) = io {
                iso.file_unref(io);
            }
        }
    }

    fn handle(
        &self,
        iso: &Iso,
        file: FileId,
        req: Request,
        callback: Completion,
    ) -> Result<(), (ReqResult, Completion)> {
        match req.ty {
            ReqType::StreamAccess => {
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::StreamAccess(StreamAccess {
                        input: true,
                        output: true,
                    }),
                );
                Ok(())
            }
            ReqType::StreamInput => {
                let RequestPayload::StreamInput(data) = req.payload else {
                    return Err((ReqResult::Invalid, callback));
                };
                let consumed = stream_input(iso, file, &data);
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::StreamInput(data.slice(0..consumed)),
                );
                Ok(())
            }
            ReqType::StreamOutput => {
                let out = iso
                    .with_ctx::<StreamCtx, Vec<u8>>(file, |ctx| std::mem::take(&mut ctx.output))
                    .unwrap_or_default();
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::StreamOutput(Bytes::from(out)),
                );
                Ok(())
            }
            _ => Err((ReqResult::Invalid, callback)),
        }
    }
}
