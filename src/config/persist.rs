//! Configuration persistence using toml_edit to preserve formatting and comments.

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;
use toml_edit::{DocumentMut, Item};

/// Save the config to a TOML file.
///
/// If the file exists, every known section is replaced in the existing
/// document so unrelated tables and top-level comments survive.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let new_content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config")?;
    let new_doc: DocumentMut = new_content
        .parse()
        .with_context(|| "Failed to parse serialized config")?;

    let doc = match std::fs::read_to_string(path) {
        Ok(existing) => {
            let mut doc: DocumentMut = existing
                .parse()
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            merge_sections(&mut doc, &new_doc);
            doc
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => new_doc,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read config file: {:?}", path))
        }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    tracing::debug!(path = %path.display(), "config saved");
    Ok(())
}

fn merge_sections(doc: &mut DocumentMut, new_doc: &DocumentMut) {
    for section in ["queue", "tools", "conversion", "thumbnails"] {
        match new_doc.get(section) {
            Some(Item::Table(new_table)) => match doc.get_mut(section) {
                Some(Item::Table(table)) => {
                    // Replace values key by key so the table's own decor stays.
                    let stale: Vec<String> = table
                        .iter()
                        .map(|(k, _)| k.to_string())
                        .filter(|k| !new_table.contains_key(k))
                        .collect();
                    for key in stale {
                        table.remove(&key);
                    }
                    for (key, value) in new_table.iter() {
                        table[key] = value.clone();
                    }
                }
                _ => doc[section] = Item::Table(new_table.clone()),
            },
            Some(item) => doc[section] = item.clone(),
            None => {
                doc.remove(section);
            }
        }
    }
}
