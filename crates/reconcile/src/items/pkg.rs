//! Package items.
//!
//! One item type covers the common system package managers; the `manager`
//! attribute selects the command family. A `provides` attribute names the
//! service family the package backs, feeding the automatic
//! service-on-package dependency rule.

use crate::error::ConfigError;
use crate::item::{BuiltinAttributes, Item, ItemId, ItemMeta, ItemStatus, validate_item_name};
use crate::paths::quote;
use crate::remote::{PathProbe, RemoteSession};
use crate::schema::{AttrValue, AttributeSchema, Attributes, RawAttributes, validate_bool};
use crate::statedict::StateDict;
use anyhow::Result;

/// Supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manager {
    Apt,
    Dnf,
    Pacman,
    Zypper,
}

impl Manager {
    pub const NAMES: &'static [&'static str] = &["apt", "dnf", "pacman", "zypper"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "apt" => Some(Self::Apt),
            "dnf" => Some(Self::Dnf),
            "pacman" => Some(Self::Pacman),
            "zypper" => Some(Self::Zypper),
            _ => None,
        }
    }

    /// Query command; judged by exit code only.
    fn query(self, pkg: &str) -> String {
        match self {
            Self::Apt => format!("dpkg -s {}", quote(pkg)),
            Self::Dnf | Self::Zypper => format!("rpm -q {}", quote(pkg)),
            Self::Pacman => format!("pacman -Q {}", quote(pkg)),
        }
    }

    fn install(self, pkg: &str) -> String {
        match self {
            Self::Apt => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get -qy install {}",
                quote(pkg)
            ),
            Self::Dnf => format!("dnf -y install {}", quote(pkg)),
            Self::Pacman => format!("pacman -S --noconfirm --needed {}", quote(pkg)),
            Self::Zypper => format!("zypper -n install {}", quote(pkg)),
        }
    }

    fn remove(self, pkg: &str) -> String {
        match self {
            Self::Apt => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get -qy remove {}",
                quote(pkg)
            ),
            Self::Dnf => format!("dnf -y remove {}", quote(pkg)),
            Self::Pacman => format!("pacman -R --noconfirm {}", quote(pkg)),
            Self::Zypper => format!("zypper -n remove {}", quote(pkg)),
        }
    }
}

fn validate_manager(
    item: &str,
    bundle: &str,
    attribute: &str,
    value: &AttrValue,
) -> Result<(), ConfigError> {
    let valid = value.as_str().is_some_and(|name| Manager::parse(name).is_some());
    if !valid {
        return Err(ConfigError::InvalidValue {
            item: item.to_string(),
            bundle: bundle.to_string(),
            attribute: attribute.to_string(),
            reason: format!("must be one of: {}", Manager::NAMES.join(", ")),
        });
    }
    Ok(())
}

/// A system package.
#[derive(Debug)]
pub struct Pkg {
    meta: ItemMeta,
    attrs: Attributes,
    manager: Manager,
}

impl Pkg {
    pub const KIND: &'static str = "pkg";

    pub fn from_attributes(
        bundle: &str,
        name: &str,
        raw: RawAttributes,
        builtins: BuiltinAttributes,
    ) -> Result<Self, ConfigError> {
        validate_item_name(Self::KIND, bundle, name)?;
        let id = ItemId::new(Self::KIND, name);
        let schema = AttributeSchema::new()
            .attr("manager")
            .required("manager")
            .attr_with_default("installed", AttrValue::Bool(true))
            .attr("provides")
            .validator("manager", validate_manager)
            .validator("installed", validate_bool);
        let attrs = schema.apply(&id.to_string(), bundle, raw, |_| {})?;
        let manager = attrs
            .get_str("manager")
            .and_then(Manager::parse)
            .unwrap_or(Manager::Apt);
        Ok(Self {
            meta: ItemMeta::new(id, bundle, builtins),
            attrs,
            manager,
        })
    }

    fn wanted(&self) -> bool {
        self.attrs.get_bool("installed").unwrap_or(true)
    }

    fn pkg(&self) -> &str {
        self.meta.id.name()
    }
}

impl Item for Pkg {
    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn cdict(&self) -> Result<StateDict> {
        let mut cdict = StateDict::new();
        cdict.insert("installed".to_string(), self.wanted().into());
        Ok(cdict)
    }

    fn sdict(&self, session: &mut dyn RemoteSession) -> Result<(StateDict, Option<PathProbe>)> {
        let id = self.meta.id.to_string();
        let output = session.run(&id, &self.manager.query(self.pkg()), true)?;
        let mut sdict = StateDict::new();
        sdict.insert("installed".to_string(), output.success().into());
        Ok((sdict, None))
    }

    fn fix(&self, session: &mut dyn RemoteSession, _status: &ItemStatus) -> Result<()> {
        let id = self.meta.id.to_string();
        let command = if self.wanted() {
            log::info!("{}: installing", self.meta.id);
            self.manager.install(self.pkg())
        } else {
            log::info!("{}: removing", self.meta.id);
            self.manager.remove(self.pkg())
        };
        session.run(&id, &command, false)?;
        Ok(())
    }

    fn provides(&self) -> Option<&str> {
        self.attrs.get_str("provides")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, AttrValue)]) -> RawAttributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn manager_is_required() {
        let err = Pkg::from_attributes(
            "base",
            "nginx",
            RawAttributes::new(),
            BuiltinAttributes::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttributes { .. }));
    }

    #[test]
    fn unknown_manager_rejected() {
        let err = Pkg::from_attributes(
            "base",
            "nginx",
            raw(&[("manager", AttrValue::text("brew"))]),
            BuiltinAttributes::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn provides_defaults_to_absent() {
        let pkg = Pkg::from_attributes(
            "base",
            "nginx-full",
            raw(&[
                ("manager", AttrValue::text("apt")),
                ("provides", AttrValue::text("nginx")),
            ]),
            BuiltinAttributes::default(),
        )
        .unwrap();
        assert_eq!(pkg.provides(), Some("nginx"));
    }

    #[test]
    fn desired_state_follows_installed_flag() {
        let pkg = Pkg::from_attributes(
            "base",
            "telnetd",
            raw(&[
                ("manager", AttrValue::text("apt")),
                ("installed", AttrValue::Bool(false)),
            ]),
            BuiltinAttributes::default(),
        )
        .unwrap();
        assert_eq!(pkg.cdict().unwrap().get("installed"), Some(&false.into()));
    }
}
