//! Layer table and dependency resolution
//!
//! Layers form a static DAG. A request for a subset of layers is normalized
//! into its dependency closure before anything runs.

use crate::{Result, TransformError};
use lazy_static::lazy_static;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Numeric layer identifier
pub type LayerId = u8;

/// What a layer works on; drives which semantic checks apply to its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerTag {
    Config,
    Entities,
    Component,
    Hydration,
    Router,
    Testing,
    Adaptive,
}

impl LayerTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerTag::Config => "config",
            LayerTag::Entities => "entities",
            LayerTag::Component => "component",
            LayerTag::Hydration => "hydration",
            LayerTag::Router => "router",
            LayerTag::Testing => "testing",
            LayerTag::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for LayerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: LayerId,
    pub name: String,
    pub tag: LayerTag,
    pub depends_on: BTreeSet<LayerId>,
}

impl LayerSpec {
    pub fn new(id: LayerId, name: &str, tag: LayerTag, depends_on: &[LayerId]) -> Self {
        Self {
            id,
            name: name.to_string(),
            tag,
            depends_on: depends_on.iter().copied().collect(),
        }
    }
}

/// Output of [`LayerRegistry::resolve`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerResolution {
    /// Requested layers plus their dependency closure, ascending
    pub corrected_layers: Vec<LayerId>,
    /// Layers that were not requested but are required, ascending
    pub auto_added: Vec<LayerId>,
    /// One entry per automatically added dependency
    pub warnings: Vec<String>,
}

/// The canonical seven-layer table
pub fn canonical_layer_specs() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new(1, "Configuration", LayerTag::Config, &[]),
        LayerSpec::new(2, "Entity Cleanup", LayerTag::Entities, &[]),
        LayerSpec::new(3, "Components", LayerTag::Component, &[2]),
        LayerSpec::new(4, "Hydration & SSR", LayerTag::Hydration, &[1, 3]),
        LayerSpec::new(5, "Next.js App Router", LayerTag::Router, &[1, 4]),
        LayerSpec::new(6, "Testing & Validation", LayerTag::Testing, &[3]),
        LayerSpec::new(7, "Adaptive Pattern Learning", LayerTag::Adaptive, &[]),
    ]
}

lazy_static! {
    static ref CANONICAL: LayerRegistry = LayerRegistry::try_new(canonical_layer_specs())
        .unwrap_or_else(|e| panic!("canonical layer table is invalid: {}", e));
}

/// Validated layer table
#[derive(Debug, Clone)]
pub struct LayerRegistry {
    specs: BTreeMap<LayerId, LayerSpec>,
    /// Position of each layer in a deterministic topological order
    rank: HashMap<LayerId, usize>,
}

impl LayerRegistry {
    /// Shared registry built from [`canonical_layer_specs`]
    pub fn canonical() -> &'static LayerRegistry {
        &CANONICAL
    }

    /// Build a registry, rejecting duplicate ids, dangling dependencies and
    /// cycles.
    pub fn try_new(specs: Vec<LayerSpec>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for spec in specs {
            let id = spec.id;
            if by_id.insert(id, spec).is_some() {
                return Err(TransformError::InvalidInput(format!("duplicate layer id {}", id)));
            }
        }

        let mut graph: DiGraphMap<LayerId, ()> = DiGraphMap::new();
        for (id, spec) in &by_id {
            graph.add_node(*id);
            for dep in &spec.depends_on {
                if !by_id.contains_key(dep) {
                    return Err(TransformError::InvalidInput(format!(
                        "layer {} depends on unknown layer {}",
                        id, dep
                    )));
                }
                graph.add_edge(*dep, *id, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            let mut members: Vec<LayerId> = petgraph::algo::tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
                .flatten()
                .collect();
            members.sort_unstable();
            return Err(TransformError::DependencyCycle(members));
        }

        let rank = Self::topological_rank(&by_id);
        Ok(Self { specs: by_id, rank })
    }

    /// Kahn's algorithm, always taking the smallest ready id
    fn topological_rank(specs: &BTreeMap<LayerId, LayerSpec>) -> HashMap<LayerId, usize> {
        let mut remaining: BTreeMap<LayerId, usize> = specs
            .iter()
            .map(|(id, spec)| (*id, spec.depends_on.len()))
            .collect();
        let mut ready: BTreeSet<LayerId> = remaining
            .iter()
            .filter(|(_, pending)| **pending == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut rank = HashMap::new();

        while let Some(next) = ready.pop_first() {
            rank.insert(next, rank.len());
            remaining.remove(&next);
            for (id, spec) in specs {
                if spec.depends_on.contains(&next) {
                    if let Some(pending) = remaining.get_mut(id) {
                        *pending -= 1;
                        if *pending == 0 {
                            ready.insert(*id);
                        }
                    }
                }
            }
        }

        rank
    }

    pub fn get(&self, id: LayerId) -> Option<&LayerSpec> {
        self.specs.get(&id)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.specs.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.specs.keys().copied()
    }

    pub fn specs(&self) -> impl Iterator<Item = &LayerSpec> {
        self.specs.values()
    }

    /// Display name, falling back to the bare id for unknown layers
    pub fn name_of(&self, id: LayerId) -> String {
        self.get(id)
            .map_or_else(|| format!("Layer {}", id), |spec| spec.name.clone())
    }

    /// Normalize a request into its sorted, deduplicated dependency closure
    pub fn resolve(&self, requested: &[LayerId]) -> Result<LayerResolution> {
        let requested: BTreeSet<LayerId> = requested.iter().copied().collect();
        if let Some(unknown) = requested.iter().find(|id| !self.contains(**id)) {
            return Err(TransformError::UnknownLayer(*unknown));
        }

        let mut present = requested.clone();
        let mut auto_added = BTreeSet::new();
        let mut warnings = Vec::new();

        for layer in &requested {
            let mut stack = vec![*layer];
            while let Some(current) = stack.pop() {
                let Some(spec) = self.get(current) else { continue };
                for dep in &spec.depends_on {
                    if present.insert(*dep) {
                        auto_added.insert(*dep);
                        warnings.push(format!(
                            "Layer {} ({}) requires layer {} ({}); added automatically",
                            current,
                            spec.name,
                            dep,
                            self.name_of(*dep)
                        ));
                        stack.push(*dep);
                    }
                }
            }
        }

        Ok(LayerResolution {
            corrected_layers: present.into_iter().collect(),
            auto_added: auto_added.into_iter().collect(),
            warnings,
        })
    }

    /// Order layers so every dependency runs before its dependents
    pub fn execution_order(&self, layers: &[LayerId]) -> Vec<LayerId> {
        let mut ordered = layers.to_vec();
        ordered.sort_by_key(|id| (self.rank.get(id).copied().unwrap_or(usize::MAX), *id));
        ordered.dedup();
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_table_is_acyclic() {
        let registry = LayerRegistry::canonical();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(registry.get(3).map(|s| s.tag), Some(LayerTag::Component));
        assert_eq!(registry.get(4).map(|s| s.tag), Some(LayerTag::Hydration));
    }

    #[test]
    fn test_resolve_adds_transitive_dependencies() {
        let resolution = LayerRegistry::canonical().resolve(&[4]).unwrap();

        assert_eq!(resolution.corrected_layers, vec![1, 2, 3, 4]);
        assert_eq!(resolution.auto_added, vec![1, 2, 3]);
        assert_eq!(resolution.warnings.len(), 3);
        assert!(resolution.warnings.iter().any(|w| w.contains("requires layer 3")));
    }

    #[test]
    fn test_resolve_deduplicates_and_sorts() {
        let resolution = LayerRegistry::canonical().resolve(&[7, 2, 2, 1]).unwrap();

        assert_eq!(resolution.corrected_layers, vec![1, 2, 7]);
        assert!(resolution.auto_added.is_empty());
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_resolve_rejects_unknown_layer() {
        let err = LayerRegistry::canonical().resolve(&[2, 42]).unwrap_err();
        assert!(matches!(err, TransformError::UnknownLayer(42)));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let specs = vec![
            LayerSpec::new(1, "a", LayerTag::Config, &[3]),
            LayerSpec::new(2, "b", LayerTag::Entities, &[1]),
            LayerSpec::new(3, "c", LayerTag::Component, &[2]),
            LayerSpec::new(4, "d", LayerTag::Testing, &[]),
        ];

        match LayerRegistry::try_new(specs) {
            Err(TransformError::DependencyCycle(members)) => assert_eq!(members, vec![1, 2, 3]),
            other => panic!("expected a cycle error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dangling_dependency_is_rejected() {
        let specs = vec![LayerSpec::new(1, "a", LayerTag::Config, &[9])];
        assert!(matches!(
            LayerRegistry::try_new(specs),
            Err(TransformError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let specs = vec![
            LayerSpec::new(1, "late", LayerTag::Testing, &[2]),
            LayerSpec::new(2, "early", LayerTag::Config, &[]),
        ];
        let registry = LayerRegistry::try_new(specs).unwrap();
        assert_eq!(registry.execution_order(&[1, 2]), vec![2, 1]);
        assert_eq!(LayerRegistry::canonical().execution_order(&[4, 1, 3]), vec![1, 3, 4]);
    }

    proptest! {
        #[test]
        fn prop_resolve_is_idempotent(requested in proptest::collection::vec(1u8..=7, 0..10)) {
            let registry = LayerRegistry::canonical();
            let first = registry.resolve(&requested).unwrap();
            let second = registry.resolve(&first.corrected_layers).unwrap();

            prop_assert_eq!(&second.corrected_layers, &first.corrected_layers);
            prop_assert!(second.auto_added.is_empty());
            prop_assert_eq!(first.auto_added.len(), first.warnings.len());
        }
    }
}
