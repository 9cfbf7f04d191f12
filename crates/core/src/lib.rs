// crates/core/src/lib.rs
pub mod cleanup;
pub mod config;
pub mod error;
pub mod export;
pub mod http;
pub mod platform;
pub mod transport;
pub mod wizard;

#[cfg(test)]
mod test_support;

pub use cleanup::*;
pub use config::*;
pub use error::*;
pub use export::{ArtifactHandle, ExportSnapshot, ExportStatus, ExportStore, Subscription};
pub use http::HttpTransport;
pub use platform::*;
pub use transport::*;
pub use wizard::*;
