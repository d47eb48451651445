//! Longest-prefix directory-walk path resolution.
//!
//! Given a starting file and a `/`-separated path, walks one `DIR_FIND` at a
//! time through nested `upd.dir` (or any other directory-category) files,
//! stopping at the first segment that does not resolve to a directory entry.
//! The unresolved remainder is handed back so a caller can decide whether to
//! create it (`DIR_NEWDIR`/`DIR_ADD`) or treat it as a genuine miss.
//!
//! `validate_segment` is grounded on `original_source/src/driver/dir.c`'s
//! `upd_path_validate_name` (rejecting empty, `.`/`..`, and control-byte
//! segments); the hop-one-`DIR_FIND`-at-a-time walk follows the same
//! source's `DIR_FIND` handler and `include/libupd.h`'s per-category
//! request shape.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ReqResult;
use crate::file::FileId;
use crate::iso::Iso;
use crate::request::{Completion, ReqType, Request, RequestPayload};

/// A path segment must be non-empty, must not be `.` or `..`, must not
/// contain `/`, and must not contain ASCII control bytes (`< 0x20` or
/// `0x7f`). Mirrors the source driver's name validation, reused here so a
/// path that could never resolve is rejected before any request is sent.
pub fn validate_segment(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.bytes().all(|b| b != b'/' && b >= 0x20 && b != 0x7f)
}

/// Split `path` on `/`, dropping empty leading/trailing segments (so both
/// `"a/b"` and `"/a/b/"` resolve the same way), and reject it outright if any
/// segment fails [`validate_segment`].
fn split_path(path: &str) -> Option<Vec<String>> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if segments.iter().all(|s| validate_segment(s)) {
        Some(segments)
    } else {
        None
    }
}

/// The outcome of a [`pathfind`] walk.
#[derive(Debug, Clone)]
pub struct PathfindResult {
    /// The deepest file successfully resolved to (`base` itself if no
    /// segment resolved at all).
    pub base: FileId,
    /// Path segments, in order, that `base`'s directory driver could not
    /// find. Empty means the whole path resolved.
    pub remainder: Vec<String>,
}

struct Walk {
    iso: Iso,
    segments: Vec<String>,
    idx: usize,
    current: FileId,
    done: Option<Box<dyn FnOnce(&Iso, ReqResult, PathfindResult)>>,
}

impl Walk {
    fn finish(self_rc: &Rc<RefCell<Walk>>, iso: &Iso, result: ReqResult) {
        let mut w = self_rc.borrow_mut();
        let base = w.current;
        let remainder = w.segments.split_off(w.idx);
        if let Some(done) = w.done.take() {
            drop(w);
            done(iso, result, PathfindResult { base, remainder });
        }
    }

    fn step(self_rc: Rc<RefCell<Walk>>) {
        let next = {
            let w = self_rc.borrow();
            if w.idx >= w.segments.len() {
                None
            } else {
                Some((w.iso.clone(), w.current, w.segments[w.idx].clone()))
            }
        };

        let Some((iso, current, segment)) = next else {
            let iso_for_finish = self_rc.borrow().iso.clone();
            Walk::finish(&self_rc, &iso_for_finish, ReqResult::Ok);
            return;
        };

        let req = Request::new(
            current,
            ReqType::DirFind,
            RequestPayload::DirFind {
                name: Some(segment),
                file: None,
                entry: None,
            },
        );

        let continuation = self_rc.clone();
        let callback = Completion::new(move |iso, _file, result, payload| {
            if !result.is_ok() {
                Walk::finish(&continuation, iso, result);
                return;
            }
            let RequestPayload::DirFind { entry, .. } = payload else {
                Walk::finish(&continuation, iso, ReqResult::Invalid);
                return;
            };
            match entry {
                Some(entry) => {
                    {
                        let mut w = continuation.borrow_mut();
                        w.current = entry.file;
                        w.idx += 1;
                    }
                    Walk::step(continuation.clone());
                }
                None => Walk::finish(&continuation, iso, ReqResult::Ok),
            }
        });

        if let Err(result) = iso.submit(req, callback) {
            Walk::finish(&self_rc, &iso, result);
        }
    }
}

/// Resolve `path` (already-owned) starting from `base`, calling `done`
/// exactly once with the final `ReqResult` (only ever `Ok` or `Invalid`, for
/// a malformed path) and the [`PathfindResult`].
///
/// Resolution proceeds one `DIR_FIND` at a time and is only as synchronous as
/// the directory drivers along the way are; a driver that defers its
/// response defers the whole walk.
pub fn pathfind(
    iso: &Iso,
    base: FileId,
    path: &str,
    done: impl FnOnce(&Iso, ReqResult, PathfindResult) + 'static,
) {
    let Some(segments) = split_path(path) else {
        done(
            iso,
            ReqResult::Invalid,
            PathfindResult {
                base,
                remainder: Vec::new(),
            },
        );
        return;
    };
    let walk = Rc::new(RefCell::new(Walk {
        iso: iso.clone(),
        segments,
        idx: 0,
        current: base,
        done: Some(Box::new(done)),
    }));
    Walk::step(walk);
}

/// As [`pathfind`], but stacks an owned copy of `path` onto the `Iso`'s
/// scratch arena for the duration of the walk, demonstrating the intended
/// use of [`Iso::stack`]/[`Iso::unstack`] for request-scoped scratch data
/// that a driver along the way might also reach for.
pub fn pathfind_with_dup(
    iso: &Iso,
    base: FileId,
    path: &str,
    done: impl FnOnce(&Iso, ReqResult, PathfindResult) + 'static,
) {
    let frame = iso.stack(path.to_string());
    let path_copy = (*frame).clone();
    let iso_for_unstack = iso.clone();
    pathfind(iso, base, &path_copy, move |iso, result, resolved| {
        iso_for_unstack.unstack(frame);
        done(iso, result, resolved);
    });
}
