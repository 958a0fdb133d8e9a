//! Print gathered host facts

use anyhow::Result;
use std::path::Path;

use crate::Context;
use crate::schema::HostDocument;
use crate::ui;

pub fn run(_ctx: &Context, document: Option<&Path>) -> Result<()> {
    let mut facts = crate::facts::gather()?;

    // document facts override gathered ones, same as during apply
    let path = match document {
        Some(p) => p.to_path_buf(),
        None => crate::paths::document_path()?,
    };
    if path.exists() {
        let doc = HostDocument::load(&path)?;
        facts.merge(&doc.facts);
    }

    ui::header("Host facts");
    for (name, value) in facts.iter() {
        ui::kv(name, &value.to_string());
    }
    Ok(())
}
