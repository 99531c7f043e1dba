//! Domain types shared by the clients, the engines and the report.

mod activity;
mod cost;
mod lifecycle;
mod owner;
mod resource_group;
mod tags;

pub use activity::*;
use chrono::{DateTime, SecondsFormat, Utc};
pub use cost::*;
pub use lifecycle::*;
pub use owner::*;
pub use resource_group::*;
pub use tags::*;

/// Render a timestamp the way the Azure APIs and our deadline tags expect it:
/// `yyyy-MM-ddTHH:mm:ss.fffZ`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
