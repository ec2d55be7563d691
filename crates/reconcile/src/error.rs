//! Error types for the reconciliation core.
//!
//! Errors fall into two categories with very different blast radii:
//! [`ConfigError`] is raised while building a node's item set and dependency
//! graph, before anything touches a managed host, and aborts the whole run.
//! [`ItemError`] is raised while reconciling a single item and is isolated to
//! that item and its dependents.

use thiserror::Error;

/// A problem with the declared configuration itself.
///
/// These are always fatal for the entire node: if the desired state is
/// unsatisfiable there is no point applying any part of it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid attribute(s) for {item} in bundle '{bundle}': {attributes}")]
    UnknownAttributes {
        item: String,
        bundle: String,
        attributes: String,
    },

    #[error("{item} in bundle '{bundle}' missing required attribute(s): {attributes}")]
    MissingAttributes {
        item: String,
        bundle: String,
        attributes: String,
    },

    #[error("invalid value for '{attribute}' on {item} in bundle '{bundle}': {reason}")]
    InvalidValue {
        item: String,
        bundle: String,
        attribute: String,
        reason: String,
    },

    #[error("invalid name for {kind} in bundle '{bundle}': '{name}' ({reason})")]
    InvalidName {
        kind: &'static str,
        bundle: String,
        name: String,
        reason: String,
    },

    #[error("duplicate definition of {item} in bundles '{bundle_a}' and '{bundle_b}'")]
    DuplicateItem {
        item: String,
        bundle_a: String,
        bundle_b: String,
    },

    #[error("{blocker} (bundle '{blocker_bundle}') blocking path to {blocked} (bundle '{blocked_bundle}')")]
    PathCollision {
        blocker: String,
        blocker_bundle: String,
        blocked: String,
        blocked_bundle: String,
    },

    #[error("unresolved dependency {dependency} of {item} in bundle '{bundle}'")]
    UnresolvedDependency {
        item: String,
        bundle: String,
        dependency: String,
    },

    #[error("redundant dependency of {item} in bundle '{bundle}' on {dependency}")]
    RedundantDependency {
        item: String,
        bundle: String,
        dependency: String,
    },

    #[error("unresolved trigger '{action}' of {item} in bundle '{bundle}'")]
    UnresolvedTrigger {
        item: String,
        bundle: String,
        action: String,
    },

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("no items match target '{target}'")]
    UnresolvedTarget { target: String },
}

/// A runtime failure while reconciling one item.
///
/// The owning item ends up `FAILED`; its dependents are skipped; unrelated
/// items proceed. The core never retries on its own.
#[derive(Debug, Error)]
pub enum ItemError {
    /// Content processing failed (template error, missing renderer).
    #[error("error rendering {item} from bundle '{bundle}': {reason}")]
    Rendering {
        item: String,
        bundle: String,
        reason: String,
    },

    /// A command that was not allowed to fail returned non-zero.
    #[error("command `{command}` for {item} returned exit code {code}: {stderr}")]
    RemoteExecution {
        item: String,
        command: String,
        code: i32,
        stderr: String,
    },

    /// The local verification hook rejected the staged payload.
    #[error("{item} failed local validation using: {command}")]
    ValidationHook { item: String, command: String },
}
