//! End-to-end coverage of spec.md §8 scenario 6: the path resolver stops at
//! the deepest resolvable directory entry and reports the rest as remainder.

use std::cell::RefCell;
use std::rc::Rc;

use upd::drivers::dir::DirDriver;
use upd::{pathfind, Completion, DirEntry, Iso, ReqType, Request, RequestPayload};

mod common;

/// root: {"a" -> dir {"b" -> X}}
fn setup() -> (Iso, upd::FileId, upd::FileId) {
    let iso = Iso::new();
    let dir_driver = DirDriver::new();
    iso.register_driver(dir_driver.clone());

    let root = iso.new_file(dir_driver.clone(), "").unwrap();
    let a = iso.new_file(dir_driver.clone(), "").unwrap();
    let x = iso.new_file(dir_driver.clone(), "").unwrap();

    let req = Request::new(root, ReqType::DirAdd, RequestPayload::DirAdd(DirEntry::strong("a", a)));
    iso.submit(req, Completion::new(|_, _, r, _| assert!(r.is_ok())))
        .unwrap();

    let req = Request::new(a, ReqType::DirAdd, RequestPayload::DirAdd(DirEntry::strong("b", x)));
    iso.submit(req, Completion::new(|_, _, r, _| assert!(r.is_ok())))
        .unwrap();

    (iso, root, x)
}

#[test]
fn pathfind_reports_remainder_past_the_deepest_resolvable_entry() {
    let _tracing = common::subscribe();
    let (iso, root, x) = setup();

    let result = Rc::new(RefCell::new(None));
    let slot = result.clone();
    pathfind(&iso, root, "/a/b/c", move |_, res, resolved| {
        assert!(res.is_ok());
        slot.borrow_mut().replace(resolved);
    });
    let resolved = result.borrow_mut().take().unwrap();
    assert_eq!(resolved.base, x);
    assert_eq!(resolved.remainder, vec!["c".to_string()]);
    assert_eq!(resolved.remainder.len(), 1);
}

#[test]
fn pathfind_on_a_fully_resolvable_path_has_no_remainder() {
    let _tracing = common::subscribe();
    let (iso, root, x) = setup();

    let result = Rc::new(RefCell::new(None));
    let slot = result.clone();
    pathfind(&iso, root, "/a/b", move |_, res, resolved| {
        assert!(res.is_ok());
        slot.borrow_mut().replace(resolved);
    });
    let resolved = result.borrow_mut().take().unwrap();
    assert_eq!(resolved.base, x);
    assert!(resolved.remainder.is_empty());
}
