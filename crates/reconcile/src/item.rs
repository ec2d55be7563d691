//! The item abstraction.
//!
//! An item is one typed unit of desired state (a directory, a file, a
//! service, ...). Every type implements the same narrow capability surface:
//! compute the canonical desired dict, query the canonical observed dict,
//! apply fixes for the aspects that differ, and derive automatic
//! dependencies from the full item set.

use crate::error::ConfigError;
use crate::remote::{PathProbe, RemoteSession};
use crate::statedict::{self, StateDict};
use anyhow::Result;
use serde::{Serialize, Serializer};
use std::fmt;

/// Identity of an item: `(kind, name)`, rendered `kind:name`.
///
/// Identity is unique within a node; a collision is a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId {
    kind: &'static str,
    name: String,
}

impl ItemId {
    pub fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Attributes every item type accepts in addition to its own schema.
#[derive(Debug, Clone, Default)]
pub struct BuiltinAttributes {
    /// Explicit dependencies, by item id.
    pub needs: Vec<String>,
    /// Canned-action ids to fire after this item was actually fixed.
    pub triggers: Vec<String>,
    /// Shell condition; exit code 0 skips the fix for this item only.
    pub unless: Option<String>,
}

/// Identity and bookkeeping shared by all item types.
#[derive(Debug, Clone)]
pub struct ItemMeta {
    pub id: ItemId,
    pub bundle: String,
    pub needs: Vec<String>,
    pub triggers: Vec<String>,
    pub unless: Option<String>,
}

impl ItemMeta {
    pub fn new(id: ItemId, bundle: &str, builtins: BuiltinAttributes) -> Self {
        Self {
            id,
            bundle: bundle.to_string(),
            needs: builtins.needs,
            triggers: builtins.triggers,
            unless: builtins.unless,
        }
    }
}

/// A named corrective command bound to an item.
///
/// Canned actions run at most once per reconciliation, and only after some
/// triggering item was actually fixed (not merely found correct).
#[derive(Debug, Clone)]
pub struct CannedAction {
    pub id: String,
    pub owner: ItemId,
    pub command: String,
}

/// Result of comparing desired against observed state for one item.
#[derive(Debug, Clone)]
pub struct ItemStatus {
    pub cdict: StateDict,
    pub sdict: StateDict,
    /// Aspects whose observed value does not satisfy the desired value,
    /// in the cdict's stable order.
    pub needs_fixing: Vec<String>,
    /// Side channel for fix routines, so they need not probe again.
    pub probe: Option<PathProbe>,
}

impl ItemStatus {
    pub fn compare(cdict: StateDict, sdict: StateDict, probe: Option<PathProbe>) -> Self {
        // Delete intent: an empty cdict means the path must go away, and
        // removal is always a "type" fix.
        let needs_fixing = if cdict.is_empty() {
            if sdict.is_empty() {
                Vec::new()
            } else {
                vec!["type".to_string()]
            }
        } else {
            statedict::diff_keys(&cdict, &sdict)
        };
        Self {
            cdict,
            sdict,
            needs_fixing,
            probe,
        }
    }

    pub fn correct(&self) -> bool {
        self.needs_fixing.is_empty()
    }

    /// Human-readable observed vs desired lines for the incorrect aspects.
    pub fn describe(&self) -> String {
        self.needs_fixing
            .iter()
            .map(|key| statedict::diff_line(key, self.sdict.get(key), self.cdict.get(key)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The capability surface every item type implements.
pub trait Item: Send + Sync + fmt::Debug {
    fn meta(&self) -> &ItemMeta;

    /// Canonical desired state. An empty dict means the item should not
    /// exist on the host.
    fn cdict(&self) -> Result<StateDict>;

    /// Canonical observed state, queried with at most one metadata probe.
    /// An empty dict means the item does not exist on the host.
    fn sdict(&self, session: &mut dyn RemoteSession) -> Result<(StateDict, Option<PathProbe>)>;

    /// Apply corrective actions for `status.needs_fixing`.
    fn fix(&self, session: &mut dyn RemoteSession, status: &ItemStatus) -> Result<()>;

    /// Item ids this item implicitly depends on, derived from the full item
    /// set. May reject colliding items.
    fn auto_deps(&self, _items: &[Box<dyn Item>]) -> Result<Vec<String>, ConfigError> {
        Ok(Vec::new())
    }

    /// Corrective commands other items may trigger on this one.
    fn canned_actions(&self) -> Vec<CannedAction> {
        Vec::new()
    }

    /// The "provides" family this item supplies, used by the automatic
    /// service-on-package dependency rule.
    fn provides(&self) -> Option<&str> {
        None
    }
}

impl dyn Item {
    pub fn id(&self) -> &ItemId {
        &self.meta().id
    }

    pub fn bundle(&self) -> &str {
        &self.meta().bundle
    }
}

/// The comparator: compute an [`ItemStatus`] for one item.
pub fn compute_status(item: &dyn Item, session: &mut dyn RemoteSession) -> Result<ItemStatus> {
    let cdict = item.cdict()?;
    let (sdict, probe) = item.sdict(session)?;
    Ok(ItemStatus::compare(cdict, sdict, probe))
}

enum Subsumes {
    All,
    Keys(&'static [&'static str]),
}

struct MergeRule {
    trigger: &'static str,
    subsumes: Subsumes,
}

/// Ordered aspect-merge rules, evaluated once per fix cycle.
///
/// Fixing `type` recreates the path and already sets everything else;
/// uploading `content` already applies mode and ownership; ownership is one
/// combined change whenever `owner` is pending, so a co-pending `group`
/// rides along instead of issuing a second command.
const MERGE_RULES: &[MergeRule] = &[
    MergeRule {
        trigger: "type",
        subsumes: Subsumes::All,
    },
    MergeRule {
        trigger: "content",
        subsumes: Subsumes::Keys(&["mode", "owner", "group"]),
    },
    MergeRule {
        trigger: "owner",
        subsumes: Subsumes::Keys(&["group"]),
    },
];

/// Collapse a set of incorrect aspects into the minimal fix plan.
pub fn merge_aspects(aspects: &[String]) -> Vec<String> {
    let mut kept: Vec<&str> = aspects.iter().map(String::as_str).collect();
    for rule in MERGE_RULES {
        if !kept.contains(&rule.trigger) {
            continue;
        }
        match rule.subsumes {
            Subsumes::All => kept.retain(|aspect| *aspect == rule.trigger),
            Subsumes::Keys(keys) => kept.retain(|aspect| !keys.contains(aspect)),
        }
    }
    kept.into_iter().map(ToOwned::to_owned).collect()
}

/// Name rules shared by every type: ids must stay parseable.
pub fn validate_item_name(
    kind: &'static str,
    bundle: &str,
    name: &str,
) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidName {
            kind,
            bundle: bundle.to_string(),
            name: name.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Additional rules for path-shaped items.
pub fn validate_path_name(
    kind: &'static str,
    bundle: &str,
    name: &str,
) -> Result<(), ConfigError> {
    validate_item_name(kind, bundle, name)?;
    if name == "/" && kind != "directory" {
        return Err(ConfigError::InvalidName {
            kind,
            bundle: bundle.to_string(),
            name: name.to_string(),
            reason: format!("'/' cannot be a {kind}"),
        });
    }
    if !crate::paths::is_normalized(name) {
        return Err(ConfigError::InvalidName {
            kind,
            bundle: bundle.to_string(),
            name: name.to_string(),
            reason: "must be an absolute, normalized path".to_string(),
        });
    }
    Ok(())
}
