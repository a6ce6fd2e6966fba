// Each integration-test binary compiles its own copy of this module and
// uses a different subset of it.
#![allow(dead_code)]

pub mod fixtures;
pub mod handlers;

pub use fixtures::*;
pub use handlers::*;
