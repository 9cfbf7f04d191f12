//! Wizard step names, used as navigation history keys.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The discrete steps of the subtitle editing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "kebab-case")]
pub enum WizardStep {
    #[default]
    Select,
    ModeSelect,
    Cut,
    AutoProcessing,
    Edit,
    Success,
}

impl WizardStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::ModeSelect => "mode-select",
            Self::Cut => "cut",
            Self::AutoProcessing => "auto-processing",
            Self::Edit => "edit",
            Self::Success => "success",
        }
    }

    /// Parse a history entry key. Unknown keys fall back to [`WizardStep::Select`].
    pub fn from_history_key(key: Option<&str>) -> Self {
        match key.map(str::trim) {
            Some("mode-select") => Self::ModeSelect,
            Some("cut") => Self::Cut,
            Some("auto-processing") => Self::AutoProcessing,
            Some("edit") => Self::Edit,
            Some("success") => Self::Success,
            _ => Self::Select,
        }
    }
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
