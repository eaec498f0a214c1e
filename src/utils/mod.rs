//! Text utilities shared by the response normalizers.

pub mod tags;

pub use tags::{extract_function_calls, split_reasoning};
