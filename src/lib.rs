//! Crowd-density client workspace facade.
//!
//! Re-exports the member crates so integration tests and downstream tools can
//! depend on a single package.

pub use common;
pub use crowd_client;
pub use telemetry;
