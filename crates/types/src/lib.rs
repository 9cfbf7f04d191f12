//! Wire types shared between the export orchestrator and the render service.
//!
//! Everything here is serialized as camelCase JSON. TypeScript bindings are
//! generated from the same definitions when the `codegen` feature is on.

pub mod error;
pub mod progress;
pub mod render;
pub mod step;

pub use error::ErrorResponse;
pub use progress::{ExportProgress, ProgressStatus, SubmitResponse};
pub use render::{RenderRequest, Resolution, SubtitleSegment, ValidationError};
pub use step::WizardStep;
