//! Application services: monitoring orchestration and link side effects.

mod links;
mod monitor;

pub use links::{copy_to_clipboard, normalize_url, LinkConsumer, SystemLinkConsumer};
pub use monitor::{run_monitor, MonitorOptions, MonitorOutcome};
