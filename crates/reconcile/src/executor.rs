//! The executor.
//!
//! Walks the dependency graph with a bounded worker pool. An item is
//! dispatched exactly once, when its last retained dependency reaches a
//! terminal state; failures and dependency-skips cascade transitively to
//! dependents, everything else unlocks them normally. The graph and the
//! per-item terminal-state map are the only state shared across workers,
//! guarded by a single mutex.

use crate::deps::Graph;
use crate::item::{CannedAction, Item, ItemId, compute_status};
use crate::remote::{RemoteHost, SessionPool};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Options for one reconciliation run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Report what would be fixed without invoking any fix routine.
    pub dry_run: bool,
    /// Worker pool size; also bounds the number of remote sessions.
    pub jobs: usize,
    /// Ask before fixing each incorrect item.
    pub interactive: bool,
    /// Restrict the run to matching items plus their dependencies.
    pub target: Option<String>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            interactive: false,
            target: None,
        }
    }
}

/// Why an item was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped; cascades further.
    Dependency { dependency: String },
    /// The operator declined the interactive confirmation.
    Declined,
    /// The item's `unless` condition already held.
    UnlessMet,
    /// The run was cancelled before this item started.
    Aborted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dependency { dependency } => write!(f, "dependency {dependency} not applied"),
            Self::Declined => f.write_str("declined"),
            Self::UnlessMet => f.write_str("unless condition met"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Terminal state of one item after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    /// Observed state already matched desired state.
    Correct,
    /// The item was incorrect and its fix converged.
    Fixed { aspects: Vec<String> },
    /// Dry run: these aspects would be fixed.
    WouldFix { aspects: Vec<String> },
    Failed { error: String },
    Skipped { reason: SkipReason },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether dependents must be skipped because of this outcome.
    fn cascades(&self) -> bool {
        matches!(
            self,
            Self::Failed { .. }
                | Self::Skipped {
                    reason: SkipReason::Dependency { .. }
                }
        )
    }
}

/// One reconciled item in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub id: ItemId,
    pub bundle: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result of one triggered canned action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub action: String,
    pub triggered_by: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Counts per terminal state; feeds the process exit code.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub correct: usize,
    pub fixed: usize,
    pub would_fix: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Correct => self.correct += 1,
            Outcome::Fixed { .. } => self.fixed += 1,
            Outcome::WouldFix { .. } => self.would_fix += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.correct + self.fixed + self.would_fix + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Everything a reconciliation run produced.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    pub entries: Vec<ReportEntry>,
    pub actions: Vec<ActionResult>,
    pub summary: Summary,
}

/// Interactive confirmation gate between status and fix.
pub trait Confirm: Send + Sync {
    /// `details` is the human-readable observed vs desired description.
    fn confirm(&self, id: &ItemId, details: &str) -> Result<bool>;
}

/// Always proceed.
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _id: &ItemId, _details: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Always decline.
pub struct AutoDecline;

impl Confirm for AutoDecline {
    fn confirm(&self, _id: &ItemId, _details: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Receives progress updates during a run.
pub trait ProgressSink: Send + Sync {
    fn on_item_start(&self, id: &ItemId);
    fn on_item_done(&self, id: &ItemId, outcome: &Outcome);
}

/// No-op progress sink.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_item_start(&self, _id: &ItemId) {}
    fn on_item_done(&self, _id: &ItemId, _outcome: &Outcome) {}
}

/// Cooperative cancellation: stops dispatching new items; in-flight items
/// finish and keep their terminal state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct RunState {
    outcome: Vec<Option<Outcome>>,
    /// Unfinished retained dependencies per item.
    remaining: Vec<usize>,
    /// First failed or skipped dependency seen, if any.
    blocked: Vec<Option<String>>,
    /// Completion order.
    order: Vec<usize>,
    fired_set: HashSet<String>,
    /// Triggered action ids with their triggering item, in fire order.
    fired: Vec<(String, String)>,
}

struct Ctx<'a> {
    items: &'a [Box<dyn Item>],
    graph: &'a Graph,
    retained: &'a [bool],
    opts: &'a ApplyOptions,
    confirm: &'a dyn Confirm,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancelToken,
    sessions: &'a SessionPool<'a>,
    state: &'a Mutex<RunState>,
}

fn lock<'a>(state: &'a Mutex<RunState>) -> MutexGuard<'a, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Execute the graph. `retained` marks the items in scope for this run.
pub(crate) fn run(
    items: &[Box<dyn Item>],
    graph: &Graph,
    retained: &[bool],
    actions: &BTreeMap<String, CannedAction>,
    host: &dyn RemoteHost,
    opts: &ApplyOptions,
    confirm: &dyn Confirm,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ApplyReport> {
    let sessions = SessionPool::new(host);
    let state = Mutex::new(RunState {
        outcome: vec![None; items.len()],
        remaining: graph
            .deps
            .iter()
            .map(|deps| deps.iter().filter(|&&dep| retained[dep]).count())
            .collect(),
        blocked: vec![None; items.len()],
        order: Vec::new(),
        fired_set: HashSet::new(),
        fired: Vec::new(),
    });
    let ctx = Ctx {
        items,
        graph,
        retained,
        opts,
        confirm,
        progress,
        cancel,
        sessions: &sessions,
        state: &state,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .context("failed to create worker pool")?;

    pool.scope(|scope| {
        let seeds: Vec<usize> = {
            let st = lock(&state);
            (0..items.len())
                .filter(|&idx| retained[idx] && st.remaining[idx] == 0)
                .collect()
        };
        for idx in seeds {
            spawn_item(scope, idx, &ctx);
        }
    });

    let st = state.into_inner().unwrap_or_else(PoisonError::into_inner);

    let mut entries = Vec::with_capacity(st.order.len());
    let mut summary = Summary::default();
    let mut record = |idx: usize, outcome: Outcome| {
        summary.add(&outcome);
        entries.push(ReportEntry {
            id: items[idx].id().clone(),
            bundle: items[idx].bundle().to_string(),
            outcome,
        });
    };
    for &idx in &st.order {
        if let Some(outcome) = st.outcome[idx].clone() {
            record(idx, outcome);
        }
    }
    // Items never dispatched because the run was cancelled.
    for idx in 0..items.len() {
        if retained[idx] && st.outcome[idx].is_none() {
            record(
                idx,
                Outcome::Skipped {
                    reason: SkipReason::Aborted,
                },
            );
        }
    }

    let action_results = run_triggered_actions(&st, items, actions, &sessions);
    summary.failed += action_results.iter().filter(|result| !result.success).count();

    Ok(ApplyReport {
        entries,
        actions: action_results,
        summary,
    })
}

/// Canned actions fire once, after the graph walk, and only when both the
/// triggering item was actually fixed and the action's owning item ended in
/// a non-failed state.
fn run_triggered_actions(
    st: &RunState,
    items: &[Box<dyn Item>],
    actions: &BTreeMap<String, CannedAction>,
    sessions: &SessionPool<'_>,
) -> Vec<ActionResult> {
    let mut results = Vec::new();
    for (action_id, triggered_by) in &st.fired {
        let Some(action) = actions.get(action_id) else {
            continue;
        };
        let owner_outcome = items
            .iter()
            .position(|item| item.id() == &action.owner)
            .and_then(|idx| st.outcome[idx].as_ref());
        let owner_applied = matches!(
            owner_outcome,
            Some(Outcome::Correct | Outcome::Fixed { .. })
        );
        if !owner_applied {
            results.push(ActionResult {
                action: action_id.clone(),
                triggered_by: triggered_by.clone(),
                success: false,
                error: Some(format!("{} was not applied", action.owner)),
            });
            continue;
        }
        log::info!("{action_id}: triggered by {triggered_by}");
        let result = sessions
            .lease()
            .and_then(|mut lease| lease.get().run(action_id, &action.command, false));
        results.push(ActionResult {
            action: action_id.clone(),
            triggered_by: triggered_by.clone(),
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }
    results
}

fn spawn_item<'a>(scope: &rayon::Scope<'a>, idx: usize, ctx: &'a Ctx<'a>) {
    scope.spawn(move |scope| {
        let outcome = process_item(idx, ctx);
        complete(scope, idx, outcome, ctx);
    });
}

/// The per-item protocol: status, gates, fix, convergence check.
fn process_item(idx: usize, ctx: &Ctx<'_>) -> Outcome {
    let item = ctx.items[idx].as_ref();
    ctx.progress.on_item_start(item.id());

    if ctx.cancel.is_cancelled() {
        return Outcome::Skipped {
            reason: SkipReason::Aborted,
        };
    }

    let mut lease = match ctx.sessions.lease() {
        Ok(lease) => lease,
        Err(e) => {
            return Outcome::Failed {
                error: e.to_string(),
            };
        }
    };

    let status = match compute_status(item, lease.get()) {
        Ok(status) => status,
        Err(e) => {
            return Outcome::Failed {
                error: e.to_string(),
            };
        }
    };
    if status.correct() {
        return Outcome::Correct;
    }

    if ctx.opts.dry_run {
        return Outcome::WouldFix {
            aspects: status.needs_fixing.clone(),
        };
    }

    if let Some(condition) = &item.meta().unless {
        let id = item.id().to_string();
        match lease.get().run(&id, condition, true) {
            Ok(output) if output.success() => {
                log::debug!("{id}: 'unless' succeeded, not fixing");
                return Outcome::Skipped {
                    reason: SkipReason::UnlessMet,
                };
            }
            Ok(_) => {}
            Err(e) => {
                return Outcome::Failed {
                    error: e.to_string(),
                };
            }
        }
    }

    if ctx.opts.interactive {
        match ctx.confirm.confirm(item.id(), &status.describe()) {
            Ok(true) => {}
            Ok(false) => {
                return Outcome::Skipped {
                    reason: SkipReason::Declined,
                };
            }
            Err(e) => {
                return Outcome::Failed {
                    error: e.to_string(),
                };
            }
        }
    }

    if let Err(e) = item.fix(lease.get(), &status) {
        return Outcome::Failed {
            error: e.to_string(),
        };
    }

    // An item only counts as fixed once a fresh status agrees.
    match compute_status(item, lease.get()) {
        Ok(post) if post.correct() => Outcome::Fixed {
            aspects: status.needs_fixing,
        },
        Ok(post) => Outcome::Failed {
            error: format!(
                "failed to converge; still needs fixing: {}",
                post.needs_fixing.join(", ")
            ),
        },
        Err(e) => Outcome::Failed {
            error: e.to_string(),
        },
    }
}

/// Record a terminal state and unlock dependents.
///
/// Unlocking is idempotent against concurrent completions: only the
/// completion that brings a dependent's remaining count to zero dispatches
/// it, exactly once, under the lock.
fn complete<'a>(scope: &rayon::Scope<'a>, idx: usize, outcome: Outcome, ctx: &'a Ctx<'a>) {
    let mut ready = Vec::new();
    let mut finished = Vec::new();
    {
        let mut st = lock(ctx.state);
        let mut queue = VecDeque::new();
        queue.push_back((idx, outcome));
        while let Some((idx, outcome)) = queue.pop_front() {
            if st.outcome[idx].is_some() {
                continue;
            }
            if matches!(outcome, Outcome::Fixed { .. }) {
                let triggered_by = ctx.items[idx].id().to_string();
                for trigger in &ctx.items[idx].meta().triggers {
                    if st.fired_set.insert(trigger.clone()) {
                        st.fired.push((trigger.clone(), triggered_by.clone()));
                    }
                }
            }
            let cascades = outcome.cascades();
            let item_id = ctx.items[idx].id().to_string();
            st.outcome[idx] = Some(outcome.clone());
            st.order.push(idx);
            finished.push((idx, outcome));
            for &dependent in &ctx.graph.dependents[idx] {
                if !ctx.retained[dependent] {
                    continue;
                }
                st.remaining[dependent] -= 1;
                if cascades && st.blocked[dependent].is_none() {
                    st.blocked[dependent] = Some(item_id.clone());
                }
                if st.remaining[dependent] == 0 {
                    if let Some(dependency) = st.blocked[dependent].clone() {
                        // Skips propagate transitively through this queue.
                        queue.push_back((
                            dependent,
                            Outcome::Skipped {
                                reason: SkipReason::Dependency { dependency },
                            },
                        ));
                    } else {
                        ready.push(dependent);
                    }
                }
            }
        }
    }
    for (done_idx, outcome) in &finished {
        ctx.progress.on_item_done(ctx.items[*done_idx].id(), outcome);
    }
    for ready_idx in ready {
        spawn_item(scope, ready_idx, ctx);
    }
}
