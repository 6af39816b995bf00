use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;

use super::Resolver;
use crate::error::{ModError, Requirement};
use crate::module::{ModuleKey, ModuleName, VersionSpec};

/// Label used as the requester of the root module in conflict reports.
const ROOT_REQUESTER: &str = "install request";

/// One module to be present, with the keys of its direct dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub key: ModuleKey,
    pub dependencies: Vec<ModuleKey>,
}

/// A resolved dependency closure. Dependencies come before their
/// dependents; the requested module is last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    nodes: Vec<PlanNode>,
}

impl ResolutionPlan {
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModuleKey> {
        self.nodes.iter().map(|node| &node.key)
    }

    /// The requested module.
    pub fn root(&self) -> Option<&ModuleKey> {
        self.nodes.last().map(|node| &node.key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Groups keys into waves. Every dependency of a key sits in an earlier
    /// wave, so keys within one wave can be installed in parallel.
    pub fn waves(&self) -> Vec<Vec<ModuleKey>> {
        let mut level: HashMap<&ModuleKey, usize> = HashMap::new();
        let mut waves: Vec<Vec<ModuleKey>> = Vec::new();
        for node in &self.nodes {
            let depth = node
                .dependencies
                .iter()
                .filter_map(|dep| level.get(dep))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(&node.key, depth);
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(node.key.clone());
        }
        waves
    }
}

pub(super) fn build(
    resolver: &Resolver<'_>,
    name: &ModuleName,
    spec: &VersionSpec,
) -> Result<ResolutionPlan> {
    let mut builder = ClosureBuilder {
        resolver,
        chosen: HashMap::new(),
        path: Vec::new(),
        nodes: Vec::new(),
    };
    builder.visit(ROOT_REQUESTER.to_string(), name, spec)?;
    debug!(
        "Resolved {} {} to {} module(s)",
        name,
        spec,
        builder.nodes.len()
    );
    Ok(ResolutionPlan {
        nodes: builder.nodes,
    })
}

/// Depth-first expansion. `path` holds the keys currently being expanded
/// and `nodes` collects keys in post-order.
struct ClosureBuilder<'r, 'a> {
    resolver: &'r Resolver<'a>,
    chosen: HashMap<ModuleName, Requirement>,
    path: Vec<ModuleKey>,
    nodes: Vec<PlanNode>,
}

impl ClosureBuilder<'_, '_> {
    fn visit(
        &mut self,
        requester: String,
        name: &ModuleName,
        spec: &VersionSpec,
    ) -> Result<ModuleKey> {
        let version = self
            .resolver
            .resolve(name, spec)
            .with_context(|| format!("Required by {}", requester))?;
        let key = ModuleKey::new(name.clone(), version);

        if let Some(start) = self.path.iter().position(|k| &k.name == name) {
            let mut cycle: Vec<String> =
                self.path[start..].iter().map(ToString::to_string).collect();
            cycle.push(key.to_string());
            return Err(ModError::CycleDetected { cycle }.into());
        }

        let requirement = Requirement {
            requester,
            spec: *spec,
            resolved: version,
        };
        if let Some(first) = self.chosen.get(name) {
            if first.resolved != version {
                return Err(ModError::VersionConflict {
                    name: name.clone(),
                    first: first.clone(),
                    second: requirement,
                }
                .into());
            }
            // Already expanded through another dependent
            return Ok(key);
        }
        self.chosen.insert(name.clone(), requirement);

        self.path.push(key.clone());
        let mut dependencies: Vec<ModuleKey> = Vec::new();
        for dependency in self.resolver.dependencies_of(&key)? {
            let dep_key = self.visit(key.to_string(), &dependency.name, &dependency.version)?;
            if !dependencies.contains(&dep_key) {
                dependencies.push(dep_key);
            }
        }
        self.path.pop();

        self.nodes.push(PlanNode {
            key: key.clone(),
            dependencies,
        });
        Ok(key)
    }
}
