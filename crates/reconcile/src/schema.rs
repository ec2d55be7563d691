//! Per-type attribute schemas.
//!
//! Each item type constructs an explicit [`AttributeSchema`] value carrying
//! its recognized attributes, defaults, and validators. Schemas are local
//! values, never process-wide registries, so they cannot leak between types
//! or tests. Raw operator input goes through a fixed pipeline: unknown-name
//! rejection, required check, type-specific normalization (`patch`), then
//! per-attribute validation.

use crate::error::ConfigError;
use std::collections::BTreeMap;

/// A raw or canonical attribute value as declared by the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Bool(bool),
    Int(i64),
    /// String-to-string mapping, used for rendering contexts.
    Map(BTreeMap<String, String>),
}

impl AttrValue {
    pub fn text(value: &str) -> Self {
        Self::Text(value.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Map(_) => "table",
        }
    }
}

/// Attributes as declared, before normalization.
pub type RawAttributes = BTreeMap<String, AttrValue>;

/// Canonical attributes after defaults, patching, and validation.
///
/// Absent optional attributes are simply missing keys.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    values: BTreeMap<String, AttrValue>,
}

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(AttrValue::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(AttrValue::as_bool)
    }

    pub fn get_map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.values.get(name).and_then(AttrValue::as_map)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// Validates one attribute value; errors must name the item and attribute.
pub type Validator =
    fn(item: &str, bundle: &str, attribute: &str, value: &AttrValue) -> Result<(), ConfigError>;

/// The recognized attributes of one item type.
pub struct AttributeSchema {
    defaults: BTreeMap<&'static str, Option<AttrValue>>,
    validators: BTreeMap<&'static str, Validator>,
    required: Vec<&'static str>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self {
            defaults: BTreeMap::new(),
            validators: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Declare an optional attribute without a default.
    pub fn attr(mut self, name: &'static str) -> Self {
        self.defaults.insert(name, None);
        self
    }

    /// Declare an attribute with a default value.
    pub fn attr_with_default(mut self, name: &'static str, default: AttrValue) -> Self {
        self.defaults.insert(name, Some(default));
        self
    }

    /// Mark a declared attribute as required.
    pub fn required(mut self, name: &'static str) -> Self {
        self.required.push(name);
        self
    }

    /// Attach a validator to a declared attribute.
    pub fn validator(mut self, name: &'static str, validator: Validator) -> Self {
        self.validators.insert(name, validator);
        self
    }

    /// Run the full normalization pipeline over raw operator input.
    pub fn apply(
        &self,
        item: &str,
        bundle: &str,
        mut raw: RawAttributes,
        patch: impl FnOnce(&mut RawAttributes),
    ) -> Result<Attributes, ConfigError> {
        let unknown: Vec<&str> = raw
            .keys()
            .filter(|name| !self.defaults.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownAttributes {
                item: item.to_string(),
                bundle: bundle.to_string(),
                attributes: unknown.join(", "),
            });
        }

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| !raw.contains_key(**name))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingAttributes {
                item: item.to_string(),
                bundle: bundle.to_string(),
                attributes: missing.join(", "),
            });
        }

        patch(&mut raw);

        for (name, value) in &raw {
            if let Some(validator) = self.validators.get(name.as_str()) {
                validator(item, bundle, name, value)?;
            }
        }

        let mut values = BTreeMap::new();
        for (name, default) in &self.defaults {
            match raw.remove(*name) {
                Some(value) => {
                    values.insert((*name).to_string(), value);
                }
                None => {
                    if let Some(default) = default {
                        values.insert((*name).to_string(), default.clone());
                    }
                }
            }
        }
        Ok(Attributes { values })
    }
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a numeric or string mode to the canonical four-digit form.
///
/// `644` and `"644"` both become `"0644"`; non-digit junk is left alone for
/// the validator to reject with a proper message.
pub fn patch_mode(raw: &mut RawAttributes) {
    if let Some(value) = raw.get("mode") {
        let text = match value {
            AttrValue::Int(n) => n.to_string(),
            AttrValue::Text(s) => s.clone(),
            _ => return,
        };
        let padded = if text.chars().all(|c| c.is_ascii_digit()) {
            format!("{text:0>4}")
        } else {
            text
        };
        raw.insert("mode".to_string(), AttrValue::Text(padded));
    }
}

/// Mode strings must be all octal digits, three or four of them.
pub fn validate_mode(
    item: &str,
    bundle: &str,
    attribute: &str,
    value: &AttrValue,
) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        item: item.to_string(),
        bundle: bundle.to_string(),
        attribute: attribute.to_string(),
        reason,
    };
    let Some(text) = value.as_str() else {
        return Err(invalid(format!(
            "mode should be written as digits, got {}",
            value.type_name()
        )));
    };
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(format!("mode should be written as digits, got: '{text}'")));
    }
    if text.chars().any(|c| c > '7') {
        return Err(invalid(format!("invalid mode: '{text}'")));
    }
    if text.len() != 3 && text.len() != 4 {
        return Err(invalid(format!(
            "mode should be three or four digits long, was: '{text}'"
        )));
    }
    Ok(())
}

/// The attribute must be a literal boolean.
pub fn validate_bool(
    item: &str,
    bundle: &str,
    attribute: &str,
    value: &AttrValue,
) -> Result<(), ConfigError> {
    if value.as_bool().is_none() {
        return Err(ConfigError::InvalidValue {
            item: item.to_string(),
            bundle: bundle.to_string(),
            attribute: attribute.to_string(),
            reason: format!("expected boolean, got {}", value.type_name()),
        });
    }
    Ok(())
}

/// Delete intent excludes every other attribute.
pub fn ensure_delete_exclusive(
    item: &str,
    bundle: &str,
    raw: &RawAttributes,
) -> Result<(), ConfigError> {
    if raw.get("delete").and_then(AttrValue::as_bool) == Some(true) && raw.len() > 1 {
        let others: Vec<&str> = raw
            .keys()
            .filter(|name| name.as_str() != "delete")
            .map(String::as_str)
            .collect();
        return Err(ConfigError::InvalidValue {
            item: item.to_string(),
            bundle: bundle.to_string(),
            attribute: "delete".to_string(),
            reason: format!(
                "cannot have other attributes besides 'delete': {}",
                others.join(", ")
            ),
        });
    }
    Ok(())
}
