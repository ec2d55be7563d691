//! # Reconcile
//!
//! The reconciliation core of a declarative configuration-management
//! engine: operators declare the desired state of a managed host as typed
//! items; this crate compares desired against observed state and issues
//! idempotent corrective actions until the two converge.
//!
//! ## Core Concepts
//!
//! - **Item**: a typed, named unit of desired state ([`items::Directory`],
//!   [`items::File`], [`items::Symlink`], [`items::Service`],
//!   [`items::Pkg`]), each implementing the [`Item`] capability surface
//! - **StateDict**: canonical desired/observed dictionaries compared
//!   aspect-by-aspect
//! - **Node**: one host's items, its dependency graph, and canned actions
//! - **Executor**: bounded worker pool walking the graph, skipping the
//!   dependents of failed items
//! - **RemoteHost / RemoteSession**: the transport seam; SSH, local exec,
//!   and in-memory mocks all live behind it
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     ApplyOptions, AutoConfirm, CancelToken, Node, NoProgress,
//!     items::Directory, item::BuiltinAttributes, schema::RawAttributes,
//! };
//!
//! let dir = Directory::from_attributes(
//!     "base",
//!     "/srv/www",
//!     RawAttributes::new(),
//!     BuiltinAttributes::default(),
//! )?;
//! let node = Node::new("web1", vec![Box::new(dir)])?;
//! let report = node.apply(
//!     &my_transport,
//!     &ApplyOptions::default(),
//!     &AutoConfirm,
//!     &NoProgress,
//!     &CancelToken::new(),
//! )?;
//! assert!(report.summary.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The crate takes its collaborators through traits so it never depends on
//! a concrete transport or UI:
//!
//! - [`RemoteHost`] / [`RemoteSession`]: command execution, metadata
//!   probes, and file transfer on the managed host
//! - [`ContentRenderer`]: template rendering for file payloads
//! - [`Confirm`]: the interactive gate between status and fix
//! - [`ProgressSink`]: progress updates during a run

pub mod deps;
pub mod error;
pub mod executor;
pub mod item;
pub mod items;
pub mod node;
pub mod paths;
pub mod remote;
pub mod render;
pub mod schema;
pub mod statedict;

// Re-export main types at crate root
pub use deps::{Graph, build_graph, select_targets};
pub use error::{ConfigError, ItemError};
pub use executor::{
    ActionResult, ApplyOptions, ApplyReport, AutoConfirm, AutoDecline, CancelToken, Confirm,
    NoProgress, Outcome, ProgressSink, ReportEntry, SkipReason, Summary,
};
pub use item::{
    BuiltinAttributes, CannedAction, Item, ItemId, ItemMeta, ItemStatus, compute_status,
    merge_aspects,
};
pub use node::{ItemReport, Node};
pub use remote::{
    CommandOutput, PathProbe, PathType, RemoteHost, RemoteSession, SessionLease, SessionPool,
};
pub use render::{ContentRenderer, ContentType};
pub use schema::{AttrValue, AttributeSchema, Attributes, RawAttributes};
pub use statedict::{StateDict, StateValue, diff_keys, hash_statedict};
