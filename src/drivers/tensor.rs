//! `upd.tensor`: an in-memory, fixed-shape tensor buffer.
//!
//! Grounded on `original_source/src/driver/tensor.c`: `TENSOR_ALLOC` replaces
//! whatever buffer existed, sized from `meta.ty` times the product of
//! `meta.shape`; `TENSOR_META`/`TENSOR_DATA` read back metadata/bytes;
//! `TENSOR_FLUSH` is a no-op hook for a future backing store, kept only so
//! the request type round-trips and so consumers can `watch` for the
//! `Update` it fans out. Rank is capped at `MAX_RANK` exactly as the source
//! caps it at 4.

use std::any::Any;
use std::rc::Rc;

use bytes::Bytes;

use crate::driver::Driver;
use crate::error::ReqResult;
use crate::file::{FileEvent, FileId};
use crate::iso::Iso;
use crate::request::{Completion, ReqCategory, ReqType, Request, RequestPayload, TensorMeta, TensorType};

const CATEGORIES: &[ReqCategory] = &[ReqCategory::Tensor];
const MAX_RANK: usize = 4;

fn elem_size(ty: TensorType) -> usize {
    match ty {
        TensorType::U8 => 1,
        TensorType::F32 => 4,
        TensorType::F64 => 8,
    }
}

#[derive(Default)]
struct TensorCtx {
    meta: TensorMeta,
    data: Vec<u8>,
}

pub struct TensorDriver;

impl TensorDriver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Driver for TensorDriver {
    fn name(&self) -> &'static str {
        "upd.tensor"
    }

    fn categories(&self) -> &'static [ReqCategory] {
        CATEGORIES
    }

    fn init(&self, _iso: &Iso, _file: FileId, _param: &str) -> Option<Box<dyn Any>> {
        Some(Box::new(TensorCtx::default()))
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
            ReqType::TensorAccess => {
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::TensorAccess);
                Ok(())
            }

            ReqType::TensorAlloc => {
                let RequestPayload::TensorAlloc(meta) = req.payload else {
                    return Err((ReqResult::Invalid, callback));
                };
                if meta.shape.len() > MAX_RANK {
                    return Err((ReqResult::Invalid, callback));
                }
                let Some(ty) = meta.ty else {
                    return Err((ReqResult::Invalid, callback));
                };
                let count: u64 = meta.shape.iter().map(|&d| d as u64).product();
                let Some(bytes) = count.checked_mul(elem_size(ty) as u64) else {
                    return Err((ReqResult::Nomem, callback));
                };
                let bytes = bytes as usize;
                let mut data = Vec::new();
                if data.try_reserve_exact(bytes).is_err() {
                    return Err((ReqResult::Nomem, callback));
                }
                data.resize(bytes, 0);
                iso.with_ctx::<TensorCtx, ()>(file, |ctx| {
                    ctx.data = data;
                    ctx.meta = meta.clone();
                });
                iso.trigger(file, FileEvent::Update);
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::TensorMeta(meta));
                Ok(())
            }

            ReqType::TensorMeta => {
                let meta = iso
                    .with_ctx::<TensorCtx, TensorMeta>(file, |ctx| ctx.meta.clone())
                    .unwrap_or_default();
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::TensorMeta(meta));
                Ok(())
            }

            ReqType::TensorData => {
                let data = iso
                    .with_ctx::<TensorCtx, Bytes>(file, |ctx| Bytes::copy_from_slice(&ctx.data))
                    .unwrap_or_default();
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::TensorData(data));
                Ok(())
            }

            ReqType::TensorFlush => {
                iso.trigger(file, FileEvent::Update);
                callback.complete(iso, file, ReqResult::Ok, RequestPayload::TensorFlush);
                Ok(())
            }

            _ => Err((ReqResult::Invalid, callback)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_read_back_meta_and_data() {
        let iso = Iso::new();
        let driver = TensorDriver::new();
        iso.register_driver(driver.clone());
        let file = iso.new_file(driver, "").unwrap();

        let meta = TensorMeta {
            ty: Some(TensorType::F32),
            shape: vec![2, 3],
        };
        let req = Request::new(file, ReqType::TensorAlloc, RequestPayload::TensorAlloc(meta));
        iso.submit(req, Completion::new(|_, _, r, _| assert!(r.is_ok())))
            .unwrap();

        let req = Request::new(file, ReqType::TensorData, RequestPayload::TensorData(Bytes::new()));
        iso.submit(
            req,
            Completion::new(|_, _, r, payload| {
                assert!(r.is_ok());
                let RequestPayload::TensorData(data) = payload else {
                    panic!("wrong payload");
                };
                assert_eq!(data.len(), 2 * 3 * 4);
            }),
        )
        .unwrap();
    }

    #[test]
    fn rejects_rank_over_max() {
        let iso = Iso::new();
        let driver = TensorDriver::new();
        iso.register_driver(driver.clone());
        let file = iso.new_file(driver, "").unwrap();

        let meta = TensorMeta {
            ty: Some(TensorType::U8),
            shape: vec![1, 1, 1, 1, 1],
        };
        let req = Request::new(file, ReqType::TensorAlloc, RequestPayload::TensorAlloc(meta));
        let result = iso.submit(req, Completion::new(|_, _, _, _| {}));
        assert_eq!(result, Err(ReqResult::Invalid));
    }
}
