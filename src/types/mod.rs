//! Canonical request, message and result types shared by every provider dialect.

mod message;
mod request;
mod response;
mod tools;

pub use message::*;
pub use request::*;
pub use response::*;
pub use tools::*;
