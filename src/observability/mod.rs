//! Observability: structured logging through `tracing`.
//!
//! Initialization is only compiled into the command-line build; the library
//! emits events and leaves subscriber setup to its host.

#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
