//! Background jobs.
//!
//! - **Tagging**: resolves resource group owners, writes owner tags and stamps
//!   lifecycle deadlines on groups nobody owns.
//!
//! Jobs follow a consistent pattern:
//! 1. Configuration in `[tagging]` and `[runtime]`
//! 2. Worker function that runs in a loop with configurable interval
//! 3. Run function that performs a single pass
//! 4. Structured result type for tracking state
//!
//! # Example
//!
//! ```toml
//! [tagging]
//! owner_tag = "owner"
//! dry_run = true
//!
//! [runtime]
//! interval_secs = 3600
//! ```

mod tagging;

pub use tagging::{TaggingPass, TaggingRunResult, start_tagging_worker};
