//! JavaScript runtime for operator input.
//!
//! [`ReplContext`] owns the Boa context, the microtask queue and the
//! [`Registry`] through which native helpers talk back to the session.

mod bindings;
pub mod context;
pub mod conversions;
pub mod job_executor;
pub mod registry;
pub mod streams;

pub use context::ReplContext;
pub use registry::{Command, Directive, Registry, Resolution, TaskOutcome};
pub use streams::StreamSource;
