//! `upd.dir`: an in-memory directory of named entries, each either a strong
//! reference (this directory holds a refcount on the target) or a weak one
//! (the entry disappears automatically once the target is deleted).
//!
//! Grounded on `original_source/src/driver/dir.c`'s `entry_t_`/`dir_t_`
//! (an array of entries, each pairing a `upd_req_dir_entry_t` with a
//! `upd_file_watch_t` used to notice a weakly-held target's deletion), with
//! the ownership flag promoted to the `Ownership` sum type called for in
//! SPEC_FULL.md §9 rather than a second boolean living next to a file id that
//! is meaningless for weak entries.

use std::any::Any;
use std::rc::Rc;

use crate::driver::Driver;
use crate::error::ReqResult;
use crate::file::{FileEvent, FileId, WatchId};
use crate::iso::Iso;
use crate::path::validate_segment;
use crate::request::{
    Completion, DirAccess, DirEntry, ReqCategory, ReqType, Request, RequestPayload,
};

const CATEGORIES: &[ReqCategory] = &[ReqCategory::Dir];

enum Ownership {
    Strong(FileId),
    Weak(FileId, WatchId),
}

impl Ownership {
    fn file(&self) -> FileId {
        match *self {
            Ownership::Strong(f) => f,
            Ownership::Weak(f, _) => f,
        }
    }
}

struct Slot {
    name: String,
    ownership: Ownership,
}

#[derive(Default)]
struct DirCtx {
    entries: Vec<Slot>,
}

impl DirCtx {
    fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|s| s.name == name)
    }

    fn find_by_file(&self, file: FileId) -> Option<usize> {
        self.entries.iter().position(|s| s.ownership.file() == file)
    }

    fn to_entry(slot: &Slot) -> DirEntry {
        match slot.ownership {
            Ownership::Strong(f) => DirEntry::strong(slot.name.clone(), f),
            Ownership::Weak(f, _) => DirEntry::weak(slot.name.clone(), f),
        }
    }
}

/// The directory driver. Holds no state of its own; all state lives in each
/// file's [`DirCtx`].
pub struct DirDriver;

impl DirDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Default for DirDriver {
    fn default() -> Self {
        Self
    }
}

fn remove_slot(iso: &Iso, file: FileId, idx: usize) -> Option<Slot> {
    iso.with_ctx::<DirCtx, Slot>(file, |ctx| ctx.entries.remove(idx))
}

/// Add a weak watch on `target` so that, if it is deleted first, the owning
/// directory's entry for it disappears without anyone calling `DIR_RM`.
fn watch_weak_target(iso: &Iso, owner: FileId, name: String, target: FileId) -> Option<WatchId> {
    iso.watch(target, move |iso, deleted, event| {
        if event != FileEvent::Delete {
            return;
        }
        let idx = iso.with_ctx::<DirCtx, Option<usize>>(owner, |ctx| {
            ctx.entries
                .iter()
                .position(|s| s.name == name && s.ownership.file() == deleted)
        });
        if let Some(Some(idx)) = idx {
            remove_slot(iso, owner, idx);
        }
    })
}

impl Driver for DirDriver {
    fn name(&self) -> &'static str {
        "upd.dir"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        CATEGORIES
    }

    fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        Some(Box::new(DirCtx::default()))
    }

    fn deinit(&self, iso: &Iso, _file: FileId, ctx: Box<dyn Any>) {
        let ctx = ctx.downcast::<DirCtx>().expect("dir driver ctx type");
        for slot in ctx.entries {
            match slot.ownership {
                Ownership::Strong(target) => iso.file_unref(target),
                Ownership::Weak(target, watch) => iso.unwatch(target, watch),
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
        let Request { ty, payload, .. } = req;
        match ty {
            ReqType::DirAccess => {
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::DirAccess(DirAccess {
                        list: true,
                        find: true,
                        add: true,
                        newdir: true,
                        rm: true,
                    }),
                );
                Ok(())
            }

            ReqType::DirList => {
                let list = iso
                    .with_ctx::<DirCtx, Vec<DirEntry>>(file, |ctx| {
                        ctx.entries.iter().map(DirCtx::to_entry).collect()
                    })
                    .unwrap_or_default();
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::DirList(list));
                Ok(())
            }

            ReqType::DirFind => {
                let RequestPayload::DirFind { name, file: target, .. } = payload else {
                    return Err((ReqResult::Invalid, callback));
                };
                let entry = iso.with_ctx::<DirCtx, Option<DirEntry>>(file, |ctx| {
                    let idx = match (&name, target) {
                        (Some(name), _) => ctx.find_by_name(name),
                        (None, Some(target)) => ctx.find_by_file(target),
                        (None, None) => None,
                    };
                    idx.map(|i| DirCtx::to_entry(&ctx.entries[i]))
                });
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::DirFind {
                        name,
                        file: target,
                        entry: entry.flatten(),
                    },
                );
                Ok(())
            }

            ReqType::DirAdd => {
                let RequestPayload::DirAdd(entry) = payload else {
                    return Err((ReqResult::Invalid, callback));
                };
                if !validate_segment(&entry.name) {
                    callback.complete(
                        iso,
                        file,
                        ReqResult::Aborted,
                        RequestPayload::DirAdd(entry),
                    );
                    return Ok(());
                }
                let exists = iso
                    .with_ctx::<DirCtx, bool>(file, |ctx| ctx.find_by_name(&entry.name).is_some())
                    .unwrap_or(true);
                if exists {
                    callback.complete(
                        iso,
                        file,
                        ReqResult::Aborted,
                        RequestPayload::DirAdd(entry),
                    );
                    return Ok(());
                }
                let ownership = if entry.weak {
                    let watch = watch_weak_target(iso, file, entry.name.clone(), entry.file);
                    match watch {
                        Some(watch) => Ownership::Weak(entry.file, watch),
                        None => {
                            callback.complete(
                                iso,
                                file,
                                ReqResult::Aborted,
                                RequestPayload::DirAdd(entry),
                            );
                            return Ok(());
                        }
                    }
                } else {
                    iso.file_ref(entry.file);
                    Ownership::Strong(entry.file)
                };
                iso.with_ctx::<DirCtx, ()>(file, |ctx| {
                    ctx.entries.push(Slot {
                        name: entry.name.clone(),
                        ownership,
                    })
                });
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::DirAdd(entry));
                Ok(())
            }

            ReqType::DirNewdir => {
                let RequestPayload::DirNewdir { name, .. } = payload else {
                    return Err((ReqResult::Invalid, callback));
                };
                if !validate_segment(&name) {
                    callback.complete(
                        iso,
                        file,
                        ReqResult::Invalid,
                        RequestPayload::DirNewdir { name, entry: None },
                    );
                    return Ok(());
                }
                let exists = iso
                    .with_ctx::<DirCtx, bool>(file, |ctx| ctx.find_by_name(&name).is_some())
                    .unwrap_or(true);
                if exists {
                    callback.complete(
                        iso,
                        file,
                        ReqResult::Aborted,
                        RequestPayload::DirNewdir { name, entry: None },
                    );
                    return Ok(());
                }
                let Some(driver) = iso.lookup_driver("upd.dir") else {
                    return Err((ReqResult::Nomem, callback));
                };
                let Some(child) = iso.new_file(driver, "") else {
                    return Err((ReqResult::Nomem, callback));
                };
                iso.with_ctx::<DirCtx, ()>(file, |ctx| {
                    ctx.entries.push(Slot {
                        name: name.clone(),
                        ownership: Ownership::Strong(child),
                    })
                });
                let entry = Some(DirEntry::strong(name.clone(), child));
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::DirNewdir { name, entry },
                );
                Ok(())
            }

            ReqType::DirRm => {
                let RequestPayload::DirRm { name, file: target, .. } = payload else {
                    return Err((ReqResult::Invalid, callback));
                };
                let idx = iso.with_ctx::<DirCtx, Option<usize>>(file, |ctx| match (&name, target)
                {
                    (Some(name), _) => ctx.find_by_name(name),
                    (None, Some(target)) => ctx.find_by_file(target),
                    (None, None) => None,
                });
                let Some(Some(idx)) = idx else {
                    callback.complete(
                        iso,
                        file,
                        ReqResult::Aborted,
                        RequestPayload::DirRm {
                            name,
                            file: target,
                            entry: None,
                        },
                    );
                    return Ok(());
                };
                let removed = remove_slot(iso, file, idx);
                let Some(removed) = removed else {
                    return Err((ReqResult::Invalid, callback));
                };
                let entry = DirCtx::to_entry(&removed);
                match removed.ownership {
                    Ownership::Strong(target) => iso.file_unref(target),
                    Ownership::Weak(target, watch) => iso.unwatch(target, watch),
                }
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::DirRm {
                        name,
                        file: target,
                        entry: Some(entry),
                    },
                );
                Ok(())
            }

            _ => Err((ReqResult::Invalid, callback)),
        }
    }
}
