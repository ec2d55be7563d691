//! Node configuration loader.
//!
//! One TOML file describes one node: its name and a list of bundles, each
//! declaring items keyed by name. Attribute values are passed through to
//! the item schemas raw, so validation errors come from one place and name
//! the offending item. File `source` payloads resolve against
//! `<config dir>/<bundle>/files/`.

use anyhow::{Context, Result, bail};
use reconcile::item::BuiltinAttributes;
use reconcile::items::{Directory, File, Pkg, Service, Symlink};
use reconcile::schema::{AttrValue, RawAttributes};
use reconcile::{Item, Node};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct NodeFile {
    name: String,
    #[serde(default)]
    bundles: Vec<BundleSection>,
}

#[derive(Deserialize)]
struct BundleSection {
    name: String,
    #[serde(default)]
    directories: toml::Table,
    #[serde(default)]
    files: toml::Table,
    #[serde(default)]
    symlinks: toml::Table,
    #[serde(default)]
    services: toml::Table,
    #[serde(default)]
    pkgs: toml::Table,
}

/// Load a node configuration, expanding `~` in the given path.
pub fn load(path: &Path) -> Result<Node> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
    let path = PathBuf::from(expanded);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let parsed: NodeFile = toml::from_str(&text)
        .with_context(|| format!("invalid node configuration in {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut items: Vec<Box<dyn Item>> = Vec::new();
    for bundle in &parsed.bundles {
        let item_dir = base_dir.join(&bundle.name).join("files");
        for (name, value) in &bundle.directories {
            let (raw, builtins) = split_attributes(&bundle.name, name, value)?;
            items.push(Box::new(Directory::from_attributes(
                &bundle.name,
                name,
                raw,
                builtins,
            )?));
        }
        for (name, value) in &bundle.files {
            let (raw, builtins) = split_attributes(&bundle.name, name, value)?;
            items.push(Box::new(File::from_attributes(
                &bundle.name,
                name,
                raw,
                builtins,
                &item_dir,
            )?));
        }
        for (name, value) in &bundle.symlinks {
            let (raw, builtins) = split_attributes(&bundle.name, name, value)?;
            items.push(Box::new(Symlink::from_attributes(
                &bundle.name,
                name,
                raw,
                builtins,
            )?));
        }
        for (name, value) in &bundle.services {
            let (raw, builtins) = split_attributes(&bundle.name, name, value)?;
            items.push(Box::new(Service::from_attributes(
                &bundle.name,
                name,
                raw,
                builtins,
            )?));
        }
        for (name, value) in &bundle.pkgs {
            let (raw, builtins) = split_attributes(&bundle.name, name, value)?;
            items.push(Box::new(Pkg::from_attributes(&bundle.name, name, raw, builtins)?));
        }
    }

    Node::new(&parsed.name, items).map_err(Into::into)
}

/// Pull the builtin attributes out of an item table; everything else goes
/// to the type's schema untouched.
fn split_attributes(
    bundle: &str,
    item: &str,
    value: &toml::Value,
) -> Result<(RawAttributes, BuiltinAttributes)> {
    let Some(table) = value.as_table() else {
        bail!("item '{item}' in bundle '{bundle}' must be a table");
    };
    let mut raw = RawAttributes::new();
    let mut builtins = BuiltinAttributes::default();
    for (key, value) in table {
        match key.as_str() {
            "needs" => builtins.needs = string_list(bundle, item, key, value)?,
            "triggers" => builtins.triggers = string_list(bundle, item, key, value)?,
            "unless" => {
                let Some(condition) = value.as_str() else {
                    bail!("'unless' for item '{item}' in bundle '{bundle}' must be a string");
                };
                builtins.unless = Some(condition.to_string());
            }
            _ => {
                raw.insert(key.clone(), attr_value(bundle, item, key, value)?);
            }
        }
    }
    Ok((raw, builtins))
}

fn string_list(bundle: &str, item: &str, key: &str, value: &toml::Value) -> Result<Vec<String>> {
    let invalid =
        || anyhow::anyhow!("'{key}' for item '{item}' in bundle '{bundle}' must be a string list");
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|entry| entry.as_str().map(ToString::to_string).ok_or_else(invalid))
        .collect()
}

fn attr_value(bundle: &str, item: &str, key: &str, value: &toml::Value) -> Result<AttrValue> {
    match value {
        toml::Value::String(s) => Ok(AttrValue::Text(s.clone())),
        toml::Value::Integer(n) => Ok(AttrValue::Int(*n)),
        toml::Value::Boolean(b) => Ok(AttrValue::Bool(*b)),
        toml::Value::Table(table) => {
            let mut map = BTreeMap::new();
            for (entry_key, entry_value) in table {
                let Some(text) = entry_value.as_str() else {
                    bail!(
                        "'{key}.{entry_key}' for item '{item}' in bundle '{bundle}' must be a string"
                    );
                };
                map.insert(entry_key.clone(), text.to_string());
            }
            Ok(AttrValue::Map(map))
        }
        other => bail!(
            "unsupported value for '{key}' on item '{item}' in bundle '{bundle}': {}",
            other.type_str()
        ),
    }
}
