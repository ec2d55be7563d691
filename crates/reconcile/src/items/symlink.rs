//! Symlink items.

use crate::error::ConfigError;
use crate::item::{
    BuiltinAttributes, Item, ItemId, ItemMeta, ItemStatus, merge_aspects, validate_path_name,
};
use crate::paths::{is_within, parent, quote};
use crate::remote::{PathProbe, RemoteSession};
use crate::schema::{AttributeSchema, Attributes, RawAttributes};
use crate::statedict::StateDict;
use anyhow::Result;

/// A managed symbolic link.
#[derive(Debug)]
pub struct Symlink {
    meta: ItemMeta,
    attrs: Attributes,
}

type FixFn = fn(&Symlink, &mut dyn RemoteSession, &ItemStatus) -> Result<()>;

const FIX_TABLE: &[(&str, FixFn)] = &[
    ("type", Symlink::fix_type),
    ("target", Symlink::fix_type),
    ("owner", Symlink::fix_owner),
    ("group", Symlink::fix_group),
];

impl Symlink {
    pub const KIND: &'static str = "symlink";

    pub fn from_attributes(
        bundle: &str,
        name: &str,
        raw: RawAttributes,
        builtins: BuiltinAttributes,
    ) -> Result<Self, ConfigError> {
        validate_path_name(Self::KIND, bundle, name)?;
        let id = ItemId::new(Self::KIND, name);
        let schema = AttributeSchema::new()
            .attr("target")
            .required("target")
            .attr("owner")
            .attr("group");
        let attrs = schema.apply(&id.to_string(), bundle, raw, |_| {})?;
        Ok(Self {
            meta: ItemMeta::new(id, bundle, builtins),
            attrs,
        })
    }

    fn name(&self) -> &str {
        self.meta.id.name()
    }

    /// Recreating the link fixes both a wrong type and a wrong target.
    fn fix_type(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let exists = status.probe.as_ref().is_some_and(|probe| probe.exists);
        if exists {
            session.run(&id, &format!("rm -rf -- {}", quote(self.name())), false)?;
        }
        if let Some(dir) = parent(self.name()) {
            session.run(&id, &format!("mkdir -p -- {}", quote(dir)), false)?;
        }
        let target = self.attrs.get_str("target").unwrap_or_default();
        session.run(
            &id,
            &format!("ln -s -- {} {}", quote(target), quote(self.name())),
            false,
        )?;
        if self.attrs.contains("owner") || self.attrs.contains("group") {
            self.fix_owner(session, status)?;
        }
        Ok(())
    }

    /// Ownership of the link itself, not what it points at.
    fn fix_owner(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let owner = self.attrs.get_str("owner").unwrap_or_default();
        let group = match self.attrs.get_str("group") {
            Some(group) => format!(":{}", quote(group)),
            None => String::new(),
        };
        session.run(
            &id,
            &format!("chown -h {}{} -- {}", quote(owner), group, quote(self.name())),
            false,
        )?;
        Ok(())
    }

    fn fix_group(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        self.fix_owner(session, status)
    }
}

impl Item for Symlink {
    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn cdict(&self) -> Result<StateDict> {
        let mut cdict = StateDict::new();
        cdict.insert("type".to_string(), "symlink".into());
        if let Some(target) = self.attrs.get_str("target") {
            cdict.insert("target".to_string(), target.into());
        }
        for attr in ["owner", "group"] {
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
        if let Some(target) = &probe.symlink_target {
            sdict.insert("target".to_string(), target.as_str().into());
        }
        for (attr, value) in [("owner", &probe.owner), ("group", &probe.group)] {
            if let Some(value) = value {
                sdict.insert(attr.to_string(), value.as_str().into());
            }
        }
        Ok((sdict, Some(probe)))
    }

    fn fix(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()> {
        let mut recreated = false;
        for aspect in merge_aspects(&status.needs_fixing) {
            // type and target share one fix; don't recreate twice.
            if aspect == "type" || aspect == "target" {
                if recreated {
                    continue;
                }
                recreated = true;
            }
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
            if kind == "file" && is_within(path, self.name()) {
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
    use crate::schema::AttrValue;

    #[test]
    fn target_is_required() {
        let err = Symlink::from_attributes(
            "base",
            "/etc/alias",
            RawAttributes::new(),
            BuiltinAttributes::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttributes { .. }));
    }

    #[test]
    fn cdict_carries_target() {
        let mut raw = RawAttributes::new();
        raw.insert("target".to_string(), AttrValue::text("/usr/bin/vim"));
        let link =
            Symlink::from_attributes("base", "/usr/bin/vi", raw, BuiltinAttributes::default())
                .unwrap();
        let cdict = link.cdict().unwrap();
        assert_eq!(cdict.get("type"), Some(&"symlink".into()));
        assert_eq!(cdict.get("target"), Some(&"/usr/bin/vim".into()));
    }
}
