//! Concrete [`crate::driver::Driver`] implementations.
//!
//! [`dir`] and [`parallelism`] are the two drivers the core substrate is
//! specified against end-to-end (§4.6/§4.7). [`factory`], [`tensor`],
//! [`script`] and [`glfw`] are the minimal exemplars that pin down the
//! interface contracts in §4.8/§4.9 without bringing in a real scripting
//! engine, tensor backend, or windowing library.

pub mod dir;
pub mod factory;
pub mod glfw;
pub mod parallelism;
pub mod script;
pub mod tensor;
