//! Dependency inference and layering.
//!
//! A node depends on every node that produces a key it consumes (required or
//! optional), plus every node named in its `depends_on`. Layers are built the Kahn
//! way: layer 0 holds nodes with no dependencies, layer `n` holds nodes whose
//! dependencies all sit in layers `< n`. Nodes left over once no more layers can be
//! formed sit on a cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::dag::{DagDefinition, DagNodeConfig};
use crate::error::DagError;
use crate::module::ModuleMetadata;
use crate::registry::ModuleRegistry;

#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub config: DagNodeConfig,
    pub metadata: ModuleMetadata,
    /// Indices of nodes that must finish before this one starts.
    pub dependencies: BTreeSet<usize>,
    /// Indices named explicitly through `depends_on`.
    pub explicit: BTreeSet<usize>,
}

impl PlannedNode {
    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub nodes: Vec<PlannedNode>,
    pub layers: Vec<Vec<usize>>,
    /// Key → indices of the nodes producing it.
    pub producers: BTreeMap<String, Vec<usize>>,
}

impl ExecutionPlan {
    /// Validates `dag` against `registry` and orders it into layers.
    pub fn build(dag: &DagDefinition, registry: &ModuleRegistry) -> Result<Self, DagError> {
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for (idx, node) in dag.nodes.iter().enumerate() {
            if index_of.insert(node.instance_id.as_str(), idx).is_some() {
                return Err(DagError::DuplicateInstance(node.instance_id.clone()));
            }
        }

        let mut nodes: Vec<PlannedNode> = Vec::with_capacity(dag.nodes.len());
        for node in &dag.nodes {
            let metadata = registry
                .metadata(&node.module_type)
                .map_err(|source| DagError::UnknownModuleType {
                    instance: node.instance_id.clone(),
                    source,
                })?
                .clone();

            let explicit = node
                .depends_on
                .iter()
                .map(|dep| {
                    index_of
                        .get(dep.as_str())
                        .copied()
                        .ok_or_else(|| DagError::UnknownDependency {
                            instance: node.instance_id.clone(),
                            dependency: dep.clone(),
                        })
                })
                .collect::<Result<BTreeSet<usize>, _>>()?;

            nodes.push(PlannedNode {
                config: node.clone(),
                metadata,
                dependencies: explicit.clone(),
                explicit,
            });
        }

        let mut producers: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for entry in &node.metadata.produces {
                producers.entry(entry.key.clone()).or_default().push(idx);
            }
        }

        for idx in 0..nodes.len() {
            let inferred: Vec<usize> = nodes[idx]
                .metadata
                .consumes
                .iter()
                .filter_map(|entry| producers.get(&entry.key))
                .flatten()
                .copied()
                .filter(|&producer| producer != idx)
                .collect();
            nodes[idx].dependencies.extend(inferred);
        }

        let layers = layer(&nodes)?;
        debug!(
            dag = %dag.name,
            nodes = nodes.len(),
            layers = layers.len(),
            "execution plan built"
        );

        Ok(Self {
            nodes,
            layers,
            producers,
        })
    }

    pub fn producers_of(&self, key: &str) -> &[usize] {
        self.producers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Layers as instance ids, handy for printing and assertions.
    pub fn layer_ids(&self) -> Vec<Vec<&str>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&idx| self.nodes[idx].instance_id()).collect())
            .collect()
    }
}

fn layer(nodes: &[PlannedNode]) -> Result<Vec<Vec<usize>>, DagError> {
    let mut remaining: HashMap<usize, usize> = nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| (idx, node.dependencies.len()))
        .collect();

    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        for &dep in &node.dependencies {
            dependents.entry(dep).or_default().push(idx);
        }
    }

    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut placed: HashSet<usize> = HashSet::new();
    let mut ready: Vec<usize> = (0..nodes.len())
        .filter(|idx| remaining[idx] == 0)
        .collect();

    while !ready.is_empty() {
        ready.sort_unstable();
        let mut next: Vec<usize> = Vec::new();
        for &idx in &ready {
            placed.insert(idx);
            for &dependent in dependents.get(&idx).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        layers.push(std::mem::take(&mut ready));
        ready = next;
    }

    if placed.len() != nodes.len() {
        let mut cyclic: Vec<String> = (0..nodes.len())
            .filter(|idx| !placed.contains(idx))
            .map(|idx| nodes[idx].instance_id().to_string())
            .collect();
        cyclic.sort();
        return Err(DagError::Cycle(cyclic));
    }

    Ok(layers)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
