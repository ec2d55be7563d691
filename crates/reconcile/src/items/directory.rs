//! Directory items.

use crate::error::ConfigError;
use crate::item::{
    BuiltinAttributes, Item, ItemId, ItemMeta, ItemStatus, merge_aspects, validate_path_name,
};
use crate::paths::{is_within, quote};
use crate::remote::{PathProbe, RemoteSession};
use crate::schema::{
    AttrValue, AttributeSchema, Attributes, RawAttributes, ensure_delete_exclusive, patch_mode,
    validate_bool, validate_mode,
};
use crate::statedict::StateDict;
use anyhow::Result;

/// A managed directory.
#[derive(Debug)]
pub struct Directory {
    meta: ItemMeta,
    attrs: Attributes,
}

type FixFn = fn(&Directory, &mut dyn RemoteSession, &ItemStatus) -> Result<()>;

/// Aspect -> corrective action, in fix order.
const FIX_TABLE: &[(&str, FixFn)] = &[
    ("type", Directory::fix_type),
    ("mode", Directory::fix_mode),
    ("owner", Directory::fix_owner),
    ("group", Directory::fix_group),
];

impl Directory {
    pub const KIND: &'static str = "directory";

    pub fn from_attributes(
        bundle: &str,
        name: &str,
        raw: RawAttributes,
        builtins: BuiltinAttributes,
    ) -> Result<Self, ConfigError> {
        validate_path_name(Self::KIND, bundle, name)?;
        let id = ItemId::new(Self::KIND, name);
        let rendered = id.to_string();
        ensure_delete_exclusive(&rendered, bundle, &raw)?;
        let schema = AttributeSchema::new()
            .attr("mode")
            .attr("owner")
            .attr("group")
            .attr_with_default("delete", AttrValue::Bool(false))
            .validator("mode", validate_mode)
            .validator("delete", validate_bool);
        let attrs = schema.apply(&rendered, bundle, raw, patch_mode)?;
        Ok(Self {
            meta: ItemMeta::new(id, bundle, builtins),
            attrs,
        })
    }

    fn delete(&self) -> bool {
        self.attrs.get_bool("delete").unwrap_or(false)
    }

    fn name(&self) -> &str {
        self.meta.id.name()
    }

    fn fix_type(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let exists = status.probe.as_ref().is_some_and(|probe| probe.exists);
        if exists {
            session.run(&id, &format!("rm -rf -- {}", quote(self.name())), false)?;
        }
        if self.delete() {
            return Ok(());
        }
        session.run(&id, &format!("mkdir -p -- {}", quote(self.name())), false)?;
        if self.attrs.contains("mode") {
            self.fix_mode(session, status)?;
        }
        if self.attrs.contains("owner") || self.attrs.contains("group") {
            self.fix_owner(session, status)?;
        }
        Ok(())
    }

    fn fix_mode(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let mode = self.attrs.get_str("mode").unwrap_or_default();
        session.run(&id, &format!("chmod {} -- {}", mode, quote(self.name())), false)?;
        Ok(())
    }

    /// One combined chown covers both owner and group.
    fn fix_owner(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let owner = self.attrs.get_str("owner").unwrap_or_default();
        let group = match self.attrs.get_str("group") {
            Some(group) => format!(":{}", quote(group)),
            None => String::new(),
        };
        session.run(
            &id,
            &format!("chown {}{} -- {}", quote(owner), group, quote(self.name())),
            false,
        )?;
        Ok(())
    }

    fn fix_group(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        self.fix_owner(session, status)
    }
}

impl Item for Directory {
    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn cdict(&self) -> Result<StateDict> {
        if self.delete() {
            return Ok(StateDict::new());
        }
        let mut cdict = StateDict::new();
        cdict.insert("type".to_string(), "directory".into());
        for attr in ["mode", "owner", "group"] {
            if let Some(value) = self.attrs.get_str(attr) {
                cdict.insert(attr.to_string(), value.into());
            }
        }
        Ok(cdict)
    }

    fn sdict(&self, session: &mut dyn RemoteSession) -> Result<(StateDict, Option<PathProbe>)> {
        let probe = session.probe(self.name())?;
        if !probe.exists {
            return Ok((StateDict::new(), Some(probe)));
        }
        let mut sdict = StateDict::new();
        if let Some(path_type) = probe.path_type {
            sdict.insert("type".to_string(), path_type.as_str().into());
        }
        for (attr, value) in [("mode", &probe.mode), ("owner", &probe.owner), ("group", &probe.group)]
        {
            if let Some(value) = value {
                sdict.insert(attr.to_string(), value.as_str().into());
            }
        }
        Ok((sdict, Some(probe)))
    }

    fn fix(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        for aspect in merge_aspects(&status.needs_fixing) {
            if let Some((_, fix)) = FIX_TABLE.iter().find(|(name, _)| *name == aspect) {
                log::info!("{}: fixing {aspect}", self.meta.id);
                fix(self, session, status)?;
            }
        }
        Ok(())
    }

    fn auto_deps(&self, items: &[Box<dyn Item>]) -> Result<Vec<String>, ConfigError> {
        let mut deps = Vec::new();
        for other in items {
            let other_meta = other.meta();
            if other_meta.id == self.meta.id {
                continue;
            }
            let kind = other_meta.id.kind();
            let path = other_meta.id.name();
            let blocks_exact =
                (kind == "file" || kind == "symlink") && path == self.name();
            let blocks_above = kind == "file" && is_within(path, self.name());
            if blocks_exact || blocks_above {
                return Err(ConfigError::PathCollision {
                    blocker: other_meta.id.to_string(),
                    blocker_bundle: other_meta.bundle.clone(),
                    blocked: self.meta.id.to_string(),
                    blocked_bundle: self.meta.bundle.clone(),
                });
            }
            if (kind == "directory" || kind == "symlink") && is_within(path, self.name()) {
                deps.push(other_meta.id.to_string());
            }
        }
        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, AttrValue)]) -> RawAttributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn directory(name: &str, attrs: RawAttributes) -> Directory {
        Directory::from_attributes("base", name, attrs, BuiltinAttributes::default()).unwrap()
    }

    #[test]
    fn cdict_includes_declared_aspects_only() {
        let dir = directory("/srv/www", raw(&[("mode", AttrValue::Int(755))]));
        let cdict = dir.cdict().unwrap();
        assert_eq!(cdict.get("type"), Some(&"directory".into()));
        assert_eq!(cdict.get("mode"), Some(&"0755".into()));
        assert!(!cdict.contains_key("owner"));
    }

    #[test]
    fn delete_yields_empty_cdict() {
        let dir = directory("/srv/www", raw(&[("delete", AttrValue::Bool(true))]));
        assert!(dir.cdict().unwrap().is_empty());
    }

    #[test]
    fn relative_path_rejected() {
        let err = Directory::from_attributes(
            "base",
            "srv/www",
            RawAttributes::new(),
            BuiltinAttributes::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidName { .. }));
    }
}
