//! Transformers layer
//!
//! Canonical types in, provider dialects out, and back again. Each dialect in
//! [`crate::standards`] implements the three traits defined here; the free
//! functions pick the implementation (by provider kind for requests, by
//! payload shape for responses and stream chunks).

pub mod request;
pub mod response;
pub mod stream;

pub use request::{
    ChatContext, ENDPOINT_KEY, HEADERS_KEY, REQUEST_ID_KEY, RequestBuilder, RequestTransformer,
    WireRequest, new_request_id, request_transformer,
};
pub use response::{NormalizedResponse, ResponseTransformer, normalize_response};
pub use stream::{StreamChunkTransformer, StreamDelta, StreamNormalizer};
