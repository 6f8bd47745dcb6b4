//! Provider Dependency Graph
//!
//! Builds execution plans for capability providers. Nodes are provider
//! names, edges are "must complete before" relations. Planning uses Kahn's
//! algorithm layer by layer, so every phase holds providers whose
//! dependencies all completed in earlier phases.
//!
//! Ordering is deterministic: providers inside a phase are sorted by name,
//! and planning an unmodified graph twice yields identical phases.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use cascade_core::{CoreError, CoreResult};

// ============================================================================
// Types
// ============================================================================

/// A set of providers that can run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    /// Phase index (0-based)
    pub index: usize,
    /// Provider names, sorted lexicographically
    pub providers: Vec<String>,
}

impl Phase {
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }
}

/// Ordered phases produced by the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub phases: Vec<Phase>,
    /// Direct dependencies of every planned provider
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Number of phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Total number of planned providers.
    pub fn provider_count(&self) -> usize {
        self.phases.iter().map(|p| p.len()).sum()
    }

    /// Planned providers in plan order.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|p| p.providers.iter().map(|s| s.as_str()))
    }

    /// Index of the phase holding `provider`.
    pub fn phase_of(&self, provider: &str) -> Option<usize> {
        self.phases
            .iter()
            .find(|p| p.contains(provider))
            .map(|p| p.index)
    }

    /// Direct dependencies of `provider` (empty if none or not planned).
    pub fn dependencies_of(&self, provider: &str) -> &[String] {
        self.dependencies
            .get(provider)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Largest phase size.
    pub fn max_parallel(&self) -> usize {
        self.phases.iter().map(|p| p.len()).max().unwrap_or(0)
    }
}

// ============================================================================
// Dependency Graph
// ============================================================================

/// Directed acyclic graph of provider dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// dependent -> providers it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from provider names and `(dependent, depends_on)` pairs.
    pub fn from_edges<I, S>(providers: I, edges: &[(S, S)]) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        S: AsRef<str>,
    {
        let mut graph = Self::new();
        for provider in providers {
            graph.add_provider(provider);
        }
        for (dependent, depends_on) in edges {
            graph.add_dependency(dependent.as_ref(), depends_on.as_ref());
        }
        graph
    }

    /// Add a provider node. Adding an existing name is a no-op.
    pub fn add_provider(&mut self, name: impl Into<String>) -> &mut Self {
        self.nodes.insert(name.into());
        self
    }

    /// Record that `dependent` must run after `depends_on`.
    ///
    /// Endpoints are validated when a plan is built, so edges may be added
    /// before their providers.
    pub fn add_dependency(
        &mut self,
        dependent: impl Into<String>,
        depends_on: impl Into<String>,
    ) -> &mut Self {
        self.edges
            .entry(dependent.into())
            .or_default()
            .insert(depends_on.into());
        self
    }

    /// Whether a provider node exists.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Provider names, sorted.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|s| s.as_str())
    }

    /// Direct dependencies of a provider.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.edges
            .get(name)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Plan every provider in the graph.
    pub fn build_plan(&self) -> CoreResult<ExecutionPlan> {
        self.validate_edges()?;
        let all: BTreeSet<&str> = self.nodes.iter().map(|s| s.as_str()).collect();
        self.layer(&all)
    }

    /// Plan the requested providers together with their transitive
    /// dependencies.
    pub fn plan_for<S: AsRef<str>>(&self, requested: &[S]) -> CoreResult<ExecutionPlan> {
        self.validate_edges()?;

        let mut selected: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in requested {
            let name = name.as_ref();
            let node = self
                .nodes
                .get(name)
                .ok_or_else(|| CoreError::unknown_provider(name))?;
            stack.push(node.as_str());
        }

        while let Some(name) = stack.pop() {
            if !selected.insert(name) {
                continue;
            }
            if let Some(deps) = self.edges.get(name) {
                stack.extend(deps.iter().map(|d| d.as_str()));
            }
        }

        self.layer(&selected)
    }

    /// Render a plan for logs: a phase list followed by per provider
    /// dependency lines.
    pub fn describe(&self, plan: &ExecutionPlan) -> String {
        let mut output = String::new();
        output.push_str("Execution Plan\n");
        output.push_str("==============\n\n");

        let mut required_by: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (dependent, deps) in &self.edges {
            for dep in deps {
                required_by
                    .entry(dep.as_str())
                    .or_default()
                    .push(dependent.as_str());
            }
        }

        for phase in &plan.phases {
            output.push_str(&format!(
                "Phase {} ({} provider{}):\n",
                phase.index + 1,
                phase.len(),
                if phase.len() == 1 { "" } else { "s" }
            ));
            for provider in &phase.providers {
                output.push_str(&format!("  - {}\n", provider));
                let deps = plan.dependencies_of(provider);
                if !deps.is_empty() {
                    output.push_str(&format!("    depends on: {}\n", deps.join(", ")));
                }
                if let Some(users) = required_by.get(provider.as_str()) {
                    let planned: Vec<&str> = users
                        .iter()
                        .copied()
                        .filter(|u| plan.phase_of(u).is_some())
                        .collect();
                    if !planned.is_empty() {
                        output.push_str(&format!("    required by: {}\n", planned.join(", ")));
                    }
                }
            }
        }

        output
    }

    /// Find one cycle among `remaining`, returned as a closed path
    /// (`[a, b, a]`). Empty if none is found.
    pub fn find_cycle<'a>(&'a self, remaining: &BTreeSet<&'a str>) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: Vec<&str> = Vec::new();

        for start in remaining {
            if let Some(cycle) = self.dfs_cycle(*start, remaining, &mut visited, &mut on_stack) {
                return cycle;
            }
        }

        Vec::new()
    }

    fn dfs_cycle<'a>(
        &'a self,
        current: &'a str,
        remaining: &BTreeSet<&'a str>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = on_stack.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = on_stack[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(current.to_string());
            return Some(cycle);
        }
        if !visited.insert(current) {
            return None;
        }

        on_stack.push(current);
        if let Some(deps) = self.edges.get(current) {
            for dep in deps.iter().filter(|d| remaining.contains(d.as_str())) {
                if let Some(cycle) = self.dfs_cycle(dep, remaining, visited, on_stack) {
                    return Some(cycle);
                }
            }
        }
        on_stack.pop();

        None
    }

    fn validate_edges(&self) -> CoreResult<()> {
        for (dependent, deps) in &self.edges {
            if !self.nodes.contains(dependent) {
                return Err(CoreError::unknown_provider(dependent.clone()));
            }
            if let Some(missing) = deps.iter().find(|d| !self.nodes.contains(*d)) {
                return Err(CoreError::unknown_provider(missing.clone()));
            }
        }
        Ok(())
    }

    /// Kahn layering restricted to `selected`.
    fn layer<'a>(&'a self, selected: &BTreeSet<&'a str>) -> CoreResult<ExecutionPlan> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for &name in selected {
            let deps: Vec<&str> = self
                .edges
                .get(name)
                .map(|d| d.iter().map(|s| s.as_str()).collect())
                .unwrap_or_default();
            in_degree.insert(name, deps.len());
            for dep in &deps {
                dependents.entry(*dep).or_default().push(name);
            }
            dependencies.insert(
                name.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            );
        }

        let mut remaining: BTreeSet<&str> = selected.clone();
        let mut phases = Vec::new();

        while !remaining.is_empty() {
            // BTreeSet iteration keeps the phase sorted
            let ready: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
                .collect();

            if ready.is_empty() {
                let mut cycle = self.find_cycle(&remaining);
                if cycle.is_empty() {
                    cycle = remaining.iter().map(|s| s.to_string()).collect();
                }
                tracing::warn!(cycle = %cycle.join(" -> "), "Dependency cycle detected");
                return Err(CoreError::CyclicDependency(cycle));
            }

            for id in &ready {
                remaining.remove(id);
                if let Some(users) = dependents.get(id) {
                    for user in users {
                        if let Some(degree) = in_degree.get_mut(user) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }

            phases.push(Phase {
                index: phases.len(),
                providers: ready.iter().map(|s| s.to_string()).collect(),
            });
        }

        Ok(ExecutionPlan {
            phases,
            dependencies,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
