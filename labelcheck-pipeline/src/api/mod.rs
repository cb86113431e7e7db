//! HTTP API handlers
//!
//! REST endpoints for job submission and status, push endpoints through which
//! an HTTP transport delivers pipeline messages, and an SSE event stream.

pub mod health;
pub mod jobs;
pub mod push;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use push::push_routes;
pub use sse::event_stream;
