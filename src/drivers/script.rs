//! Minimal stand-ins for the source's embedded-scripting drivers
//! (`upd.dev.lua`, `upd.dev.duktape`).
//!
//! `original_source/src/driver/dev/lua.c` and `duktape.c` both register with
//! an empty category list (`cats = { 0 }`): neither accepts `Dir`/`Prog`/
//! `Stream`/`Tensor` requests through the bus at all. All real interaction
//! happens through a language-specific embedding API bridging `lua_State`/
//! `duk_context` objects to `upd_file_t`/`upd_req_t`, which is out of scope
//! here (see SPEC_FULL.md Non-goals). These stubs keep the driver names and
//! the "accepts nothing over the bus" contract so a directory listing that
//! expects to find them, or code that probes `categories()`, behaves
//! truthfully instead of the names simply not existing.

use std::any::Any;
use std::rc::Rc;

use crate::driver::Driver;
use crate::error::ReqResult;
use crate::file::FileId;
use crate::iso::Iso;
use crate::request::{Completion, ReqCategory, Request};

const NO_CATEGORIES: &[ReqCategory] = &[];

macro_rules! script_stub_driver {
    ($ty:ident, $name:literal) => {
        pub struct $ty;

        impl $ty {
            pub fn new() -> Rc<Self> {
                Rc::new(Self)
            }
        }

        impl Driver for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn categories(&self) -> &'static [ReqCategory] {
                NO_CATEGORIES
            }

            fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
                Some(Box::new(()))
            }

            fn deinit(&self, _iso: &Iso, _file: FileId, _ctx: Box<dyn Any>) {}

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
    };
}

script_stub_driver!(LuaDriver, "upd.dev.lua");
script_stub_driver!(DuktapeDriver, "upd.dev.duktape");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neither_driver_accepts_bus_categories() {
        assert!(LuaDriver::new().categories().is_empty());
        assert!(DuktapeDriver::new().categories().is_empty());
    }
}
