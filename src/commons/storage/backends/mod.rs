//! Storage backends.
//!
//! Each backend provides the same set of types: a `Store`, its
//! `Transaction`, and an `Error`. The dispatch over them lives in
//! [`super::store`]; a new backend needs to be added to the macro
//! invocation at the bottom of that file.

pub mod disk;
pub mod memory;
