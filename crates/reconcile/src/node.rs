//! A node: one managed host's items for one reconciliation run.

use crate::deps::{build_graph, select_targets};
use crate::error::ConfigError;
use crate::executor::{self, ApplyOptions, ApplyReport, CancelToken, Confirm, ProgressSink};
use crate::item::{CannedAction, Item, compute_status};
use crate::remote::{RemoteHost, SessionPool};
use crate::statedict::StateDict;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Structured status of one item, JSON-serializable for the metadata
/// surface.
#[derive(Debug, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub bundle: String,
    pub correct: bool,
    pub needs_fixing: Vec<String>,
    pub desired: StateDict,
    pub observed: StateDict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One managed host's declared items plus the canned actions they expose.
///
/// A node lives for a single reconciliation run: build the graph, execute,
/// report. Nothing persists across runs except the host itself.
#[derive(Debug)]
pub struct Node {
    name: String,
    items: Vec<Box<dyn Item>>,
    actions: BTreeMap<String, CannedAction>,
}

impl Node {
    /// Assemble a node, registering canned actions and resolving trigger
    /// references. Dependency validation happens at graph-build time.
    pub fn new(name: &str, items: Vec<Box<dyn Item>>) -> Result<Self, ConfigError> {
        let mut actions = BTreeMap::new();
        for item in &items {
            for action in item.canned_actions() {
                actions.insert(action.id.clone(), action);
            }
        }
        for item in &items {
            let meta = item.meta();
            for trigger in &meta.triggers {
                if !actions.contains_key(trigger) {
                    return Err(ConfigError::UnresolvedTrigger {
                        item: meta.id.to_string(),
                        bundle: meta.bundle.clone(),
                        action: trigger.clone(),
                    });
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            items,
            actions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[Box<dyn Item>] {
        &self.items
    }

    /// Reconcile the node: derive the graph, then walk it with the
    /// executor. Configuration errors abort before any remote action.
    pub fn apply(
        &self,
        host: &dyn RemoteHost,
        opts: &ApplyOptions,
        confirm: &dyn Confirm,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ApplyReport> {
        let graph = build_graph(&self.items)?;
        let retained = match &opts.target {
            Some(target) => select_targets(&self.items, &graph, target)?,
            None => vec![true; self.items.len()],
        };
        log::info!(
            "{}: applying {} of {} items with {} workers",
            self.name,
            retained.iter().filter(|&&r| r).count(),
            self.items.len(),
            opts.jobs
        );
        executor::run(
            &self.items,
            &graph,
            &retained,
            &self.actions,
            host,
            opts,
            confirm,
            progress,
            cancel,
        )
    }

    /// Query every item's status without fixing anything.
    ///
    /// The graph is still derived first so that configuration errors
    /// surface exactly as they would on apply.
    pub fn verify(&self, host: &dyn RemoteHost, jobs: usize) -> Result<Vec<ItemReport>> {
        build_graph(&self.items)?;
        let sessions = SessionPool::new(host);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()
            .context("failed to create worker pool")?;
        let reports = pool.install(|| {
            self.items
                .par_iter()
                .map(|item| {
                    let meta = item.meta();
                    let status = sessions
                        .lease()
                        .and_then(|mut lease| compute_status(item.as_ref(), lease.get()));
                    match status {
                        Ok(status) => ItemReport {
                            id: meta.id.to_string(),
                            bundle: meta.bundle.clone(),
                            correct: status.correct(),
                            needs_fixing: status.needs_fixing,
                            desired: status.cdict,
                            observed: status.sdict,
                            error: None,
                        },
                        Err(e) => ItemReport {
                            id: meta.id.to_string(),
                            bundle: meta.bundle.clone(),
                            correct: false,
                            needs_fixing: Vec::new(),
                            desired: StateDict::new(),
                            observed: StateDict::new(),
                            error: Some(e.to_string()),
                        },
                    }
                })
                .collect()
        });
        Ok(reports)
    }

    /// The desired state of one item, for the metadata query surface.
    pub fn desired_state(&self, item_id: &str) -> Result<StateDict, ConfigError> {
        let item = self
            .items
            .iter()
            .find(|item| item.id().to_string() == item_id)
            .ok_or_else(|| ConfigError::UnresolvedTarget {
                target: item_id.to_string(),
            })?;
        item.cdict().map_err(|e| ConfigError::InvalidValue {
            item: item_id.to_string(),
            bundle: item.bundle().to_string(),
            attribute: "content".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::BuiltinAttributes;
    use crate::items::{File, Service};
    use crate::schema::RawAttributes;
    use std::path::Path;

    fn file_with_triggers(name: &str, triggers: &[&str]) -> Box<dyn Item> {
        let builtins = BuiltinAttributes {
            triggers: triggers.iter().map(ToString::to_string).collect(),
            ..BuiltinAttributes::default()
        };
        Box::new(
            File::from_attributes(
                "base",
                name,
                RawAttributes::new(),
                builtins,
                Path::new("/nonexistent"),
            )
            .unwrap(),
        )
    }

    #[test]
    fn triggers_must_reference_known_actions() {
        let err = Node::new("web1", vec![file_with_triggers("/a", &["service:nginx:restart"])])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedTrigger { .. }));
    }

    #[test]
    fn canned_actions_are_registered() {
        let service: Box<dyn Item> = Box::new(
            Service::from_attributes(
                "base",
                "nginx",
                RawAttributes::new(),
                BuiltinAttributes::default(),
            )
            .unwrap(),
        );
        let node = Node::new(
            "web1",
            vec![service, file_with_triggers("/a", &["service:nginx:restart"])],
        )
        .unwrap();
        assert_eq!(node.items().len(), 2);
    }

    #[test]
    fn desired_state_requires_a_known_item() {
        let node = Node::new("web1", vec![file_with_triggers("/a", &[])]).unwrap();
        assert!(node.desired_state("file:/a").is_ok());
        assert!(matches!(
            node.desired_state("file:/ghost"),
            Err(ConfigError::UnresolvedTarget { .. })
        ));
    }
}
