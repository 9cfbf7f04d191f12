//! Config layering for the CLI: file, then environment, then flags.

use std::path::Path;

use anyhow::{Context, Result};
use subtitler_core::ExportConfig;
use subtitler_types::RenderRequest;

pub fn resolve_config(file: Option<&Path>, base_url: Option<&str>) -> Result<ExportConfig> {
    let config = match file {
        Some(path) => ExportConfig::load(path)?,
        None => ExportConfig::default(),
    };
    let mut config = config.with_env();
    if let Some(url) = base_url {
        config.base_url = url.to_string();
    }
    config.validate()?;
    Ok(config)
}

pub fn read_request(path: &Path) -> Result<RenderRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading render request {}", path.display()))?;
    let request: RenderRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing render request {}", path.display()))?;
    request
        .validate()
        .with_context(|| format!("invalid render request {}", path.display()))?;
    Ok(request)
}
