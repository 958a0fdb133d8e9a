//! Validate the desired-state document

use anyhow::Result;
use std::path::Path;

use crate::Context;
use crate::schema::HostDocument;
use crate::ui;

pub fn run(_ctx: &Context, document: Option<&Path>) -> Result<()> {
    let path = match document {
        Some(p) => p.to_path_buf(),
        None => crate::paths::document_path()?,
    };

    let doc = HostDocument::load(&path)?;

    ui::success(&format!("{} is valid", path.display()));
    ui::kv("assertions", &doc.assertions.len().to_string());
    ui::kv("handlers", &doc.handlers.len().to_string());
    let platforms = doc.teardown.map_or(0, |t| t.platforms.len());
    ui::kv("teardown platforms", &platforms.to_string());
    Ok(())
}
