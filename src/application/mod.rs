// Application layer - orchestration of read-modify-write cycles against the
// store, conflict retries, and the audit surface.

pub mod error;
pub mod retry;
pub mod service;

pub use error::*;
pub use retry::*;
pub use service::*;
