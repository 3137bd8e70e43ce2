//! Task graph construction and stage layering
//!
//! Uses petgraph to build a DAG from the `after` constraints of registered
//! tasks, then layers it into [`Stage`]s: every task lands in the first stage
//! that comes after all of its dependencies.

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::error::{Result, StagehandError};

/// One step of a pipeline: a single task or a set run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Stage {
    Task(String),
    Parallel(Vec<String>),
}

impl Stage {
    /// Build a stage from a list of names, collapsing singletons
    pub fn from_names(mut names: Vec<String>) -> Self {
        if names.len() == 1 {
            Stage::Task(names.remove(0))
        } else {
            Stage::Parallel(names)
        }
    }

    pub fn tasks(&self) -> &[String] {
        match self {
            Stage::Task(name) => std::slice::from_ref(name),
            Stage::Parallel(names) => names,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.tasks().len() > 1
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Task(name) => write!(f, "{}", name),
            Stage::Parallel(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// A node in the task graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
}

/// The task dependency graph
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build a graph from `(task, after)` pairs
    pub fn new<'a, I>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let tasks: Vec<(&str, &[String])> = tasks.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (name, _) in &tasks {
            let idx = graph.add_node(TaskNode {
                name: name.to_string(),
            });
            name_to_index.insert(name.to_string(), idx);
        }

        for (name, after) in &tasks {
            let task_idx = name_to_index[*name];

            for dep in after.iter() {
                let dep_idx =
                    name_to_index
                        .get(dep)
                        .ok_or_else(|| StagehandError::TaskNotFound {
                            name: dep.clone(),
                            available: tasks.iter().map(|(n, _)| n.to_string()).collect(),
                        })?;

                // Edge goes from dependency TO dependent (dep must run first)
                graph.add_edge(*dep_idx, task_idx, ());
            }
        }

        if is_cyclic_directed(&graph) {
            let cycle = Self::find_cycle_description(&graph, &name_to_index);
            return Err(StagehandError::GraphCycle { cycle });
        }

        Ok(Self {
            graph,
            name_to_index,
        })
    }

    /// Get execution order for the given targets (including dependencies)
    pub fn execution_order(&self, targets: &[&str]) -> Result<Vec<&TaskNode>> {
        let mut required = HashSet::new();
        for target in targets {
            let idx = self.index_of(target)?;
            required.extend(self.get_ancestors(idx));
        }

        let sorted = toposort(&self.graph, None).map_err(|_| StagehandError::GraphCycle {
            cycle: "Unknown cycle detected".to_string(),
        })?;

        Ok(sorted
            .into_iter()
            .filter(|idx| required.contains(idx))
            .map(|idx| &self.graph[idx])
            .collect())
    }

    /// Layer the targets and their dependencies into stages
    ///
    /// A task's layer is one more than the deepest of its dependencies. Names
    /// within a stage are sorted so plans are stable.
    pub fn stages(&self, targets: &[&str]) -> Result<Vec<Stage>> {
        let order = self.execution_order(targets)?;
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut layers: BTreeMap<usize, Vec<String>> = BTreeMap::new();

        for node in order {
            let layer = self
                .dependencies(&node.name)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|dep| depth.get(dep).map(|d| d + 1))
                .max()
                .unwrap_or(0);

            depth.insert(node.name.as_str(), layer);
            layers.entry(layer).or_default().push(node.name.clone());
        }

        Ok(layers
            .into_values()
            .map(|mut names| {
                names.sort();
                Stage::from_names(names)
            })
            .collect())
    }

    /// Stages covering every task in the graph
    pub fn all_stages(&self) -> Result<Vec<Stage>> {
        let names: Vec<&str> = self.task_names().collect();
        self.stages(&names)
    }

    fn index_of(&self, name: &str) -> Result<NodeIndex> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| StagehandError::TaskNotFound {
                name: name.to_string(),
                available: self.name_to_index.keys().cloned().collect(),
            })
    }

    /// Get ancestors (all dependencies, transitive) of a node
    fn get_ancestors(&self, target: NodeIndex) -> Vec<NodeIndex> {
        use petgraph::visit::Bfs;

        let mut ancestors = vec![target];
        let mut visited = HashSet::new();
        visited.insert(target);

        // BFS backwards through dependencies
        let reversed = petgraph::visit::Reversed(&self.graph);
        let mut bfs = Bfs::new(&reversed, target);

        while let Some(node) = bfs.next(&reversed) {
            if visited.insert(node) {
                ancestors.push(node);
            }
        }

        ancestors
    }

    /// Find a human-readable description of a cycle
    fn find_cycle_description(
        graph: &DiGraph<TaskNode, ()>,
        name_to_index: &HashMap<String, NodeIndex>,
    ) -> String {
        let mut names: Vec<&String> = name_to_index.keys().collect();
        names.sort();

        for name in names {
            let idx = name_to_index[name];
            let mut visited = HashSet::new();
            let mut path = vec![name.clone()];

            if Self::dfs_find_cycle(graph, idx, idx, &mut visited, &mut path) {
                return path.join(" -> ");
            }
        }

        "Unknown cycle".to_string()
    }

    fn dfs_find_cycle(
        graph: &DiGraph<TaskNode, ()>,
        current: NodeIndex,
        target: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<String>,
    ) -> bool {
        for neighbor in graph.neighbors(current) {
            if neighbor == target {
                path.push(graph[target].name.clone());
                return true;
            }

            if visited.insert(neighbor) {
                path.push(graph[neighbor].name.clone());
                if Self::dfs_find_cycle(graph, neighbor, target, visited, path) {
                    return true;
                }
                path.pop();
            }
        }

        false
    }

    /// Get all task names
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.name_to_index.keys().map(|s| s.as_str())
    }

    /// Get direct dependencies of a task
    pub fn dependencies(&self, name: &str) -> Option<Vec<&str>> {
        self.name_to_index.get(name).map(|&idx| {
            self.graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|dep_idx| self.graph[dep_idx].name.as_str())
                .collect()
        })
    }

    /// Check that no task in `stages` starts before its dependencies
    ///
    /// A dependency placed in the same or a later stage is an error. A
    /// dependency left out of `stages` entirely is not required.
    pub fn check_order(&self, stages: &[Stage]) -> Result<()> {
        let mut first_stage: HashMap<&str, usize> = HashMap::new();
        for (index, stage) in stages.iter().enumerate() {
            for name in stage.tasks() {
                first_stage.entry(name.as_str()).or_insert(index);
            }
        }

        for (index, stage) in stages.iter().enumerate() {
            for name in stage.tasks() {
                let late = self
                    .dependencies(name)
                    .unwrap_or_default()
                    .into_iter()
                    .find(|dep| first_stage.get(dep).is_some_and(|&at| at >= index));

                if let Some(dep) = late {
                    return Err(StagehandError::StageOrder {
                        task: name.clone(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
