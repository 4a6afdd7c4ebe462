//! Model access for the two-tier pipeline.
//!
//! A [`ModelClient`] per tier wraps either a live [`HttpBackend`] or the
//! deterministic [`MockBackend`]; callers cannot tell the two apart except
//! through the `mocked` status on the records they get back.

mod error;
pub use error::CallError;

pub mod backend;
pub mod cache;
pub mod client;
pub mod extract;
pub mod http;
pub mod mock;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{ModelBackend, ModelRequest};
pub use client::{InvokeOptions, ModelClient, RetryPolicy};
pub use extract::{Critique, MissingRisk, extract_json};
pub use http::HttpBackend;
pub use mock::{MOCK_TAG, MockBackend};
