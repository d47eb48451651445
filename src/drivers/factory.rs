//! `upd.factory`: a `PROG_EXEC`-only driver that creates a fresh file bound
//! to whatever driver its `init` param named.
//!
//! Grounded on `original_source/src/driver/factory.c`: `init` resolves
//! `f->param` via the driver registry once and caches the `Rc<dyn Driver>`;
//! `PROG_EXEC` allocates a brand-new file of that driver and hands it back.
//! Every other request type is `Invalid`.

use std::any::Any;
use std::rc::Rc;

use crate::driver::Driver;
use crate::error::ReqResult;
use crate::file::FileId;
use crate::iso::Iso;
use crate::request::{Completion, ReqCategory, ReqType, Request, RequestPayload};

const CATEGORIES: &[ReqCategory] = &[ReqCategory::Prog];

struct FactoryCtx {
    product: Rc<dyn Driver>,
}

pub struct FactoryDriver;

impl FactoryDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Driver for FactoryDriver {
    fn name(&self) -> &'static str {
        "upd.factory"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        CATEGORIES
    }

    fn init(&self, iso: &Iso, _file: FileId, param: &str) -> Option<Box<dyn Any>> {
        let product = iso.lookup_driver(param)?;
        Some(Box::new(FactoryCtx { product }))
    }

    fn deinit(&self, _iso: &Iso, _file: FileId, _ctx: Box<dyn Any>) {}

    fn handle(
        &self,
        iso: &Iso,
        file: FileId,
        req: Request,
        callback: Completion,
    ) -> Result<(), (ReqResult, Completion)> {
        if req.ty == ReqType::ProgAccess {
            callback.complete(
                iso,
                file,
                ReqResult::Ok,
                RequestPayload::ProgAccess(crate::request::ProgAccess { exec: true }),
            );
            return Ok(());
        }
        if req.ty != ReqType::ProgExec {
            return Err((ReqResult::Invalid, callback));
        }
        let product = iso
            .with_ctx::<FactoryCtx, Rc<dyn Driver>>(file, |ctx| ctx.product.clone())
            .expect("factory file must carry its ctx");
        match iso.new_file(product, "") {
            Some(product_file) => {
                callback.complete(
                    iso,
                    file,
                    ReqResult::Ok,
                    RequestPayload::ProgExec(Some(product_file)),
                );
                Ok(())
            }
            None => {
                iso.msg("upd.factory: ", "product creation failure");
                Err((ReqResult::Aborted, callback))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dir::DirDriver;

    #[test]
    fn exec_creates_product_of_looked_up_driver() {
        let iso = Iso::new();
        iso.register_driver(DirDriver::new());
        iso.register_driver(FactoryDriver::new());

        let factory_driver = iso.lookup_driver("upd.factory").unwrap();
        let factory = iso.new_file(factory_driver, "upd.dir").unwrap();

        let req = Request::new(factory, ReqType::ProgExec, RequestPayload::ProgExec(None));
        iso.submit(
            req,
            Completion::new(|iso, _, result, payload| {
                assert!(result.is_ok());
                let RequestPayload::ProgExec(product) = payload else {
                    panic!("wrong payload");
                };
                let product = product.unwrap();
                assert_eq!(iso.driver_name(product), Some("upd.dir"));
            }),
        )
        .unwrap();
    }

    #[test]
    fn successive_execs_each_mint_a_distinct_file() {
        let iso = Iso::new();
        iso.register_driver(DirDriver::new());
        iso.register_driver(FactoryDriver::new());

        let factory_driver = iso.lookup_driver("upd.factory").unwrap();
        let factory = iso.new_file(factory_driver, "upd.dir").unwrap();

        let exec = |iso: &Iso| -> FileId {
            let req = Request::new(factory, ReqType::ProgExec, RequestPayload::ProgExec(None));
            let got: Rc<std::cell::Cell<Option<FileId>>> = Rc::new(std::cell::Cell::new(None));
            let slot = got.clone();
            iso.submit(
                req,
                Completion::new(move |_, _, result, payload| {
                    assert!(result.is_ok());
                    let RequestPayload::ProgExec(product) = payload else {
                        panic!("wrong payload");
                    };
                    slot.set(Some(product.unwrap()));
                }),
            )
            .unwrap();
            got.get().unwrap()
        };

        let first = exec(&iso);
        let second = exec(&iso);
        assert_ne!(first, second, "factory must not hand back the same file twice");
        assert!(iso.file_exists(first));
        assert!(iso.file_exists(second));
    }

    #[test]
    fn unknown_driver_fails_init() {
        let iso = Iso::new();
        let factory_driver = iso.lookup_driver("upd.factory");
        assert!(factory_driver.is_none());
        iso.register_driver(FactoryDriver::new());
        let factory_driver = iso.lookup_driver("upd.factory").unwrap();
        assert!(iso.new_file(factory_driver, "upd.nonexistent").is_none());
    }
}
