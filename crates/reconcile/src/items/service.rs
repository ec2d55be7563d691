//! systemd service items.

use crate::error::ConfigError;
use crate::item::{
    BuiltinAttributes, CannedAction, Item, ItemId, ItemMeta, ItemStatus, validate_item_name,
};
use crate::paths::quote;
use crate::remote::{PathProbe, RemoteSession};
use crate::schema::{AttrValue, AttributeSchema, Attributes, RawAttributes, validate_bool};
use crate::statedict::StateDict;
use anyhow::Result;

/// A service managed through systemd.
#[derive(Debug)]
pub struct Service {
    meta: ItemMeta,
    attrs: Attributes,
}

impl Service {
    pub const KIND: &'static str = "service";

    pub fn from_attributes(
        bundle: &str,
        name: &str,
        raw: RawAttributes,
        builtins: BuiltinAttributes,
    ) -> Result<Self, ConfigError> {
        validate_item_name(Self::KIND, bundle, name)?;
        let id = ItemId::new(Self::KIND, name);
        let schema = AttributeSchema::new()
            .attr_with_default("running", AttrValue::Bool(true))
            .validator("running", validate_bool);
        let attrs = schema.apply(&id.to_string(), bundle, raw, |_| {})?;
        Ok(Self {
            meta: ItemMeta::new(id, bundle, builtins),
            attrs,
        })
    }

    fn should_run(&self) -> bool {
        self.attrs.get_bool("running").unwrap_or(true)
    }

    fn unit(&self) -> &str {
        self.meta.id.name()
    }
}

impl Item for Service {
    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn cdict(&self) -> Result<StateDict> {
        let mut cdict = StateDict::new();
        cdict.insert("running".to_string(), self.should_run().into());
        Ok(cdict)
    }

    /// The status probe itself may fail; a failing probe means "not
    /// running", never an item error.
    fn sdict(&self, session: &mut dyn RemoteSession) -> Result<(StateDict, Option<PathProbe>)> {
        let id = self.meta.id.to_string();
        let output = session.run(
            &id,
            &format!("systemctl status -- {}", quote(self.unit())),
            true,
        )?;
        let mut sdict = StateDict::new();
        sdict.insert("running".to_string(), output.success().into());
        Ok((sdict, None))
    }

    fn fix(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let verb = if self.should_run() { "start" } else { "stop" };
        log::info!("{}: {verb}ing", self.meta.id);
        session.run(
            &id,
            &format!("systemctl {verb} -- {}", quote(self.unit())),
            false,
        )?;
        Ok(())
    }

    /// Services depend on whichever package provides them, so packages
    /// install before the services they back.
    fn auto_deps(&self, items: &[Box<dyn Item>]) -> Result<Vec<String>, ConfigError> {
        let mut deps = Vec::new();
        for other in items {
            let other_meta = other.meta();
            if other_meta.id.kind() != "pkg" {
                continue;
            }
            if other.provides() == Some(self.unit()) || other_meta.id.name() == self.unit() {
                deps.push(other_meta.id.to_string());
            }
        }
        Ok(deps)
    }

    fn canned_actions(&self) -> Vec<CannedAction> {
        ["reload", "restart"]
            .into_iter()
            .map(|verb| CannedAction {
                id: format!("{}:{verb}", self.meta.id),
                owner: self.meta.id.clone(),
                command: format!("systemctl {verb} -- {}", quote(self.unit())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, raw: RawAttributes) -> Service {
        Service::from_attributes("base", name, raw, BuiltinAttributes::default()).unwrap()
    }

    #[test]
    fn running_defaults_to_true() {
        let svc = service("nginx", RawAttributes::new());
        assert_eq!(svc.cdict().unwrap().get("running"), Some(&true.into()));
    }

    #[test]
    fn running_must_be_boolean() {
        let mut raw = RawAttributes::new();
        raw.insert("running".to_string(), AttrValue::text("yes"));
        let err =
            Service::from_attributes("base", "nginx", raw, BuiltinAttributes::default())
                .unwrap_err();
        assert!(err.to_string().contains("expected boolean"));
    }

    #[test]
    fn canned_actions_cover_reload_and_restart() {
        let svc = service("nginx", RawAttributes::new());
        let actions = svc.canned_actions();
        let ids: Vec<&str> = actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["service:nginx:reload", "service:nginx:restart"]);
        assert!(actions[1].command.contains("systemctl restart"));
    }
}
