// crates/core/src/export/mod.rs
//! Export job orchestration.
//!
//! [`ExportStore`] owns the single export job: it submits render requests,
//! runs one progress poller per job, fans state out to subscribers and
//! releases server resources when an export is abandoned.

mod poller;
pub mod state;
mod store;
mod subscription;
pub mod types;

pub use poller::{CONNECTION_LOST_MESSAGE, JOB_FAILED_MESSAGE, JOB_NOT_FOUND_MESSAGE};
pub use state::{ExportEvent, ExportJob, ExportPhase, IgnoreReason, Transition};
pub use store::ExportStore;
pub use subscription::Subscription;
pub use types::{ArtifactHandle, ExportSnapshot, ExportStatus};
