//! Dependency resolution.
//!
//! Builds the directed acyclic graph that orders one node's items: explicit
//! `needs` edges declared by the operator, plus automatic edges derived by
//! each item type from the full item set. Duplicate identities, path
//! collisions, unresolvable references, and cycles are all fatal here,
//! before anything touches the managed host.

use crate::error::ConfigError;
use crate::item::Item;
use std::collections::{BTreeSet, HashMap};

/// Application-order graph over one node's items, by index.
#[derive(Debug)]
pub struct Graph {
    /// For each item, the items it must wait for.
    pub deps: Vec<Vec<usize>>,
    /// Reverse edges: the items waiting on each item.
    pub dependents: Vec<Vec<usize>>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

/// Derive and validate the dependency graph for a set of items.
pub fn build_graph(items: &[Box<dyn Item>]) -> Result<Graph, ConfigError> {
    let mut index: HashMap<String, usize> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        let id = item.id().to_string();
        if let Some(&existing) = index.get(&id) {
            return Err(ConfigError::DuplicateItem {
                item: id,
                bundle_a: items[existing].bundle().to_string(),
                bundle_b: item.bundle().to_string(),
            });
        }
        index.insert(id, idx);
    }

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (idx, item) in items.iter().enumerate() {
        let meta = item.meta();

        let mut declared = BTreeSet::new();
        for need in &meta.needs {
            if !declared.insert(need.as_str()) {
                return Err(ConfigError::RedundantDependency {
                    item: meta.id.to_string(),
                    bundle: meta.bundle.clone(),
                    dependency: need.clone(),
                });
            }
        }

        let mut resolved = BTreeSet::new();
        for need in meta.needs.iter().chain(item.auto_deps(items)?.iter()) {
            let Some(&dep_idx) = index.get(need) else {
                return Err(ConfigError::UnresolvedDependency {
                    item: meta.id.to_string(),
                    bundle: meta.bundle.clone(),
                    dependency: need.clone(),
                });
            };
            // Automatic edges may duplicate explicit ones; keep one.
            if resolved.insert(dep_idx) {
                deps[idx].push(dep_idx);
            }
        }
    }

    if let Some(cycle) = find_cycle(&deps) {
        return Err(ConfigError::DependencyCycle {
            cycle: cycle.iter().map(|&idx| items[idx].id().to_string()).collect(),
        });
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (idx, item_deps) in deps.iter().enumerate() {
        for &dep in item_deps {
            dependents[dep].push(idx);
        }
    }

    Ok(Graph { deps, dependents })
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut colors = vec![Color::White; deps.len()];
    let mut stack = Vec::new();
    for start in 0..deps.len() {
        if colors[start] == Color::White
            && let Some(cycle) = visit(start, deps, &mut colors, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: usize,
    deps: &[Vec<usize>],
    colors: &mut [Color],
    stack: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    colors[node] = Color::Gray;
    stack.push(node);
    for &dep in &deps[node] {
        match colors[dep] {
            Color::Gray => {
                let pos = stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle = stack[pos..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            Color::White => {
                if let Some(cycle) = visit(dep, deps, colors, stack) {
                    return Some(cycle);
                }
            }
            Color::Black => {}
        }
    }
    stack.pop();
    colors[node] = Color::Black;
    None
}

/// Restrict a run to the items matching `target`, plus everything they
/// transitively depend on.
///
/// A target is either a bare kind (`file`) or an exact id (`file:/etc/motd`).
pub fn select_targets(
    items: &[Box<dyn Item>],
    graph: &Graph,
    target: &str,
) -> Result<Vec<bool>, ConfigError> {
    let mut retained = vec![false; items.len()];
    let mut frontier = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let matches = if target.contains(':') {
            item.id().to_string() == target
        } else {
            item.id().kind() == target
        };
        if matches {
            frontier.push(idx);
        }
    }
    if frontier.is_empty() {
        return Err(ConfigError::UnresolvedTarget {
            target: target.to_string(),
        });
    }
    while let Some(idx) = frontier.pop() {
        if retained[idx] {
            continue;
        }
        retained[idx] = true;
        frontier.extend(graph.deps[idx].iter().copied());
    }
    Ok(retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{BuiltinAttributes, Item};
    use crate::items::{Directory, File};
    use crate::schema::RawAttributes;
    use std::path::Path;

    fn builtins(needs: &[&str]) -> BuiltinAttributes {
        BuiltinAttributes {
            needs: needs.iter().map(ToString::to_string).collect(),
            ..BuiltinAttributes::default()
        }
    }

    fn dir(name: &str, needs: &[&str]) -> Box<dyn Item> {
        Box::new(
            Directory::from_attributes("base", name, RawAttributes::new(), builtins(needs))
                .unwrap(),
        )
    }

    fn file(name: &str, needs: &[&str]) -> Box<dyn Item> {
        Box::new(
            File::from_attributes(
                "base",
                name,
                RawAttributes::new(),
                builtins(needs),
                Path::new("/nonexistent"),
            )
            .unwrap(),
        )
    }

    #[test]
    fn file_depends_on_containing_directory() {
        let items = vec![dir("/a", &[]), file("/a/b", &[])];
        let graph = build_graph(&items).unwrap();
        assert_eq!(graph.deps[1], vec![0]);
        assert_eq!(graph.dependents[0], vec![1]);
    }

    #[test]
    fn file_under_file_is_a_collision() {
        let items = vec![file("/a/b", &[]), file("/a/b/c", &[])];
        let err = build_graph(&items).unwrap_err();
        assert!(matches!(err, ConfigError::PathCollision { .. }));
    }

    #[test]
    fn duplicate_identity_rejected() {
        let items = vec![file("/a", &[]), file("/a", &[])];
        let err = build_graph(&items).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateItem { .. }));
    }

    #[test]
    fn unresolved_need_rejected() {
        let items = vec![file("/a", &["file:/ghost"])];
        let err = build_graph(&items).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedDependency { .. }));
    }

    #[test]
    fn duplicate_need_rejected() {
        let items = vec![dir("/a", &[]), file("/b", &["directory:/a", "directory:/a"])];
        let err = build_graph(&items).unwrap_err();
        assert!(matches!(err, ConfigError::RedundantDependency { .. }));
    }

    #[test]
    fn auto_dep_duplicating_explicit_need_is_fine() {
        let items = vec![dir("/a", &[]), file("/a/b", &["directory:/a"])];
        let graph = build_graph(&items).unwrap();
        assert_eq!(graph.deps[1], vec![0]);
    }

    #[test]
    fn cycles_are_reported_with_members() {
        let items = vec![file("/a", &["file:/b"]), file("/b", &["file:/a"])];
        let err = build_graph(&items).unwrap_err();
        let ConfigError::DependencyCycle { cycle } = err else {
            panic!("expected cycle error, got {err}");
        };
        assert!(cycle.contains(&"file:/a".to_string()));
        assert!(cycle.contains(&"file:/b".to_string()));
    }

    #[test]
    fn target_selection_pulls_in_dependencies() {
        let items = vec![dir("/a", &[]), file("/a/b", &[]), file("/c", &[])];
        let graph = build_graph(&items).unwrap();
        let retained = select_targets(&items, &graph, "file:/a/b").unwrap();
        assert_eq!(retained, vec![true, true, false]);

        let by_kind = select_targets(&items, &graph, "file").unwrap();
        assert_eq!(by_kind, vec![true, true, true]);
    }

    #[test]
    fn unmatched_target_is_fatal() {
        let items = vec![file("/a", &[])];
        let graph = build_graph(&items).unwrap();
        let err = select_targets(&items, &graph, "service:nginx").unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedTarget { .. }));
    }
}
