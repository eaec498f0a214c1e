//! Tool registration and execution

mod registry;

pub use registry::*;
