//! End-to-end coverage of spec.md §8 scenario 5: framing through a real
//! echoing program multiplexed over `upd.prog.parallelism.stream`, and
//! isolation between two concurrent sessions.
//!
//! `upd.prog.parallelism`'s own `ProgExec` only mints a fresh multiplexed
//! stream (see `drivers::parallelism`'s unit tests) — it is not itself
//! something that echoes. To exercise the framing contract end-to-end this
//! file provides a minimal program/stream pair that actually echoes back
//! whatever it is fed, the way a real sub-process target would.

use std::any::Any;
use std::rc::Rc;

use bytes::Bytes;

use upd::drivers::dir::DirDriver;
use upd::drivers::parallelism::{ParallelismProgDriver, ParallelismStreamDriver};
use upd::{
    Completion, Driver, DirEntry, FileEvent, FileId, Iso, ReqCategory, ReqResult, ReqType, Request,
    RequestPayload, StreamAccess,
};

mod common;

struct EchoStreamCtx {
    pending: Vec<u8>,
}

struct EchoStreamDriver;

impl Driver for EchoStreamDriver {
    fn name(&self) -> &'static str {
        "test.echo.stream"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        &[ReqCategory::Stream]
    }

    fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        Some(Box::new(EchoStreamCtx { pending: Vec::new() }))
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
                iso.with_ctx::<EchoStreamCtx, ()>(file, |ctx| {
                    ctx.pending.extend_from_slice(&data)
                });
                let consumed = data.clone();
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::StreamInput(consumed));
                iso.trigger(file, FileEvent::Update);
                Ok(())
            }
            ReqType::StreamOutput => {
                let out = iso
                    .with_ctx::<EchoStreamCtx, Vec<u8>>(file, |ctx| std::mem::take(&mut ctx.pending))
                    .unwrap_or_default();
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::StreamOutput(Bytes::from(out)));
                Ok(())
            }
            _ => Err((ReqResult::Invalid, callback)),
        }
    }
}

struct EchoProgDriver;

impl Driver for EchoProgDriver {
    fn name(&self) -> &'static str {
        "test.echo.prog"
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
        if req.ty != ReqType::ProgExec {
            return Err((ReqResult::Invalid, callback));
        }
        let echo_stream = iso.lookup_driver("test.echo.stream").unwrap();
        match iso.new_file(echo_stream, "") {
            Some(f) => {
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::ProgExec(Some(f)));
                // Drop the creation ref, same as `upd.prog.parallelism`'s own
                // `ProgExec`: the consumer takes its own ref on the result.
                iso.file_unref(f);
                Ok(())
            }
            None => Err((ReqResult::Nomem, callback)),
        }
    }
}

fn frame(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&id.to_le_bytes());
    v.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    v.extend_from_slice(payload);
    v
}

fn setup() -> (Iso, FileId) {
    let iso = Iso::new();
    iso.register_driver(DirDriver::new());
    iso.register_driver(Rc::new(EchoStreamDriver));
    iso.register_driver(Rc::new(EchoProgDriver));
    iso.register_driver(ParallelismProgDriver::new());
    iso.register_driver(ParallelismStreamDriver::new());

    let dir_driver = iso.lookup_driver("upd.dir").unwrap();
    let root = iso.new_file(dir_driver, "").unwrap();

    let echo_prog_driver = iso.lookup_driver("test.echo.prog").unwrap();
    let echo = iso.new_file(echo_prog_driver, "").unwrap();
    let req = Request::new(root, ReqType::DirAdd, RequestPayload::DirAdd(DirEntry::strong("e", echo)));
    iso.submit(req, Completion::new(|_, _, r, _| assert!(r.is_ok())))
        .unwrap();

    let stream_driver = iso.lookup_driver("upd.prog.parallelism.stream").unwrap();
    let host = iso.new_file(stream_driver, "").unwrap();
    (iso, host)
}

fn send(iso: &Iso, host: FileId, bytes: Vec<u8>) {
    let req = Request::new(host, ReqType::StreamInput, RequestPayload::StreamInput(Bytes::from(bytes)));
    iso.submit(req, Completion::new(|_, _, r, _| assert!(r.is_ok())))
        .unwrap();
}

fn recv(iso: &Iso, host: FileId) -> Vec<u8> {
    let req = Request::new(host, ReqType::StreamOutput, RequestPayload::StreamOutput(Bytes::new()));
    let out = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let slot = out.clone();
    iso.submit(
        req,
        Completion::new(move |_, _, r, payload| {
            assert!(r.is_ok());
            let RequestPayload::StreamOutput(data) = payload else {
                panic!("wrong payload");
            };
            *slot.borrow_mut() = data.to_vec();
        }),
    )
    .unwrap();
    out.borrow().clone()
}

#[test]
fn echoed_bytes_round_trip_through_the_multiplexed_frame() {
    let _tracing = common::subscribe();
    let (iso, host) = setup();

    send(&iso, host, frame(1, b"/e"));
    send(&iso, host, frame(1, b"abc"));
    send(&iso, host, frame(1, &[]));

    let mut expected = frame(1, b"abc");
    expected.extend_from_slice(&frame(1, &[]));
    assert_eq!(recv(&iso, host), expected);
}

#[test]
fn two_concurrent_sessions_do_not_observe_each_others_payload() {
    let _tracing = common::subscribe();
    let (iso, host) = setup();

    send(&iso, host, frame(1, b"/e"));
    send(&iso, host, frame(2, b"/e"));
    send(&iso, host, frame(1, b"hello"));
    send(&iso, host, frame(2, b"world"));

    let out = recv(&iso, host);
    // sid 1's payload never appears framed under sid 2 and vice versa: every
    // frame we get back must echo exactly the bytes sent for its own sid.
    let mut cursor = out.as_slice();
    let mut seen = Vec::new();
    while cursor.len() >= 4 {
        let id = u16::from_le_bytes([cursor[0], cursor[1]]);
        let size = u16::from_le_bytes([cursor[2], cursor[3]]) as usize;
        let payload = &cursor[4..4 + size];
        seen.push((id, payload.to_vec()));
        cursor = &cursor[4 + size..];
    }
    for (id, payload) in &seen {
        match id {
            1 => assert_eq!(payload, b"hello"),
            2 => assert_eq!(payload, b"world"),
            other => panic!("unexpected sid {other}"),
        }
    }
}
