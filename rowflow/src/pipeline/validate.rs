//! Build-time validation and shape planning.

use super::{GraphDescription, HopDef};
use crate::core::RowShape;
use crate::errors::BuildError;
use crate::routing::{error_shape, Distribution};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Output of validation: a topological order and the planned shapes.
#[derive(Debug, Clone, Default)]
pub struct GraphPlan {
    order: Vec<String>,
    inputs: HashMap<String, Arc<RowShape>>,
    outputs: HashMap<String, Arc<RowShape>>,
}

impl GraphPlan {
    /// Stage names, producers before consumers.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// The planned input shape of a stage. `None` for sources.
    #[must_use]
    pub fn input_shape(&self, stage: &str) -> Option<&Arc<RowShape>> {
        self.inputs.get(stage)
    }

    /// The planned output shape of a stage.
    #[must_use]
    pub fn output_shape(&self, stage: &str) -> Option<&Arc<RowShape>> {
        self.outputs.get(stage)
    }

    fn hop_shape(&self, hop: &HopDef) -> Option<Arc<RowShape>> {
        if hop.error {
            let base = self
                .inputs
                .get(&hop.from)
                .or_else(|| self.outputs.get(&hop.from))?;
            error_shape(base).ok().map(Arc::new)
        } else {
            self.outputs.get(&hop.from).cloned()
        }
    }
}

fn graph_error(code: &str, message: String, stages: Vec<String>, hint: &str) -> BuildError {
    BuildError::coded(code, message).involving(stages).hint(hint)
}

impl GraphDescription {
    /// Validates the graph and plans the shape of every link.
    ///
    /// No thread is started and no stage state is created.
    pub fn validate(&self) -> Result<GraphPlan, BuildError> {
        self.check_stages()?;
        self.check_hops()?;
        self.check_targets()?;
        self.detect_cycles()?;
        self.plan_shapes()
    }

    fn check_stages(&self) -> Result<(), BuildError> {
        if self.stages.is_empty() {
            return Err(graph_error(
                "GRAPH-EMPTY",
                format!("Graph '{}' has no stages", self.name),
                Vec::new(),
                "Add at least one stage before building.",
            ));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(graph_error(
                    "GRAPH-DUPLICATE-STAGE",
                    format!("Stage '{}' is defined more than once", stage.name),
                    vec![stage.name.clone()],
                    "Give every stage a unique name.",
                ));
            }
            if stage.copies == 0 {
                return Err(graph_error(
                    "GRAPH-ZERO-COPIES",
                    format!("Stage '{}' must run at least one copy", stage.name),
                    vec![stage.name.clone()],
                    "Set copies to 1 or more.",
                ));
            }
        }
        Ok(())
    }

    fn check_hops(&self) -> Result<(), BuildError> {
        let mut pairs = HashSet::new();
        let mut error_hops = HashSet::new();
        for hop in self.enabled_hops() {
            for (referrer, name) in [(&hop.to, &hop.from), (&hop.from, &hop.to)] {
                if self.stage(name).is_none() {
                    return Err(BuildError::unknown_stage(referrer, name));
                }
            }
            if hop.from == hop.to {
                return Err(graph_error(
                    "GRAPH-SELF-HOP",
                    format!("Stage '{}' has a hop to itself", hop.from),
                    vec![hop.from.clone()],
                    "Remove the hop; loops are not supported.",
                ));
            }
            if !pairs.insert((hop.from.as_str(), hop.to.as_str())) {
                return Err(graph_error(
                    "GRAPH-DUPLICATE-HOP",
                    format!("More than one hop from '{}' to '{}'", hop.from, hop.to),
                    vec![hop.from.clone(), hop.to.clone()],
                    "Keep a single hop between two stages.",
                ));
            }
            if hop.capacity == Some(0) {
                return Err(graph_error(
                    "GRAPH-ZERO-CAPACITY",
                    format!("Hop '{}' -> '{}' has capacity 0", hop.from, hop.to),
                    vec![hop.from.clone(), hop.to.clone()],
                    "Use a capacity of at least 1.",
                ));
            }
            if hop.error {
                if hop.target.is_some() {
                    return Err(graph_error(
                        "GRAPH-ERROR-HOP-TARGET",
                        format!("Error hop '{}' -> '{}' cannot be bound to a target", hop.from, hop.to),
                        vec![hop.from.clone(), hop.to.clone()],
                        "Declare the error hop without a target name.",
                    ));
                }
                if !error_hops.insert(hop.from.as_str()) {
                    return Err(graph_error(
                        "GRAPH-MULTIPLE-ERROR-HOPS",
                        format!("Stage '{}' has more than one error hop", hop.from),
                        vec![hop.from.clone()],
                        "Route rejected rows through a single error hop.",
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_targets(&self) -> Result<(), BuildError> {
        let mut declared: HashSet<(&str, &str)> = HashSet::new();
        for decl in &self.targets {
            if self.stage(&decl.stage).is_none() {
                return Err(BuildError::unknown_stage(&decl.name, &decl.stage));
            }
            declared.insert((decl.stage.as_str(), decl.name.as_str()));
        }

        let mut bound: HashSet<(&str, &str)> = HashSet::new();
        for hop in self.enabled_hops() {
            let Some(target) = hop.target.as_deref() else {
                continue;
            };
            if !declared.contains(&(hop.from.as_str(), target)) {
                return Err(graph_error(
                    "GRAPH-UNDECLARED-HOP-TARGET",
                    format!(
                        "Hop '{}' -> '{}' is bound to target '{target}' which is not declared",
                        hop.from, hop.to
                    ),
                    vec![hop.from.clone(), hop.to.clone()],
                    "Declare the target for the producing stage.",
                ));
            }
            if !bound.insert((hop.from.as_str(), target)) {
                return Err(graph_error(
                    "GRAPH-TARGET-BOUND-TWICE",
                    format!("Target '{target}' of stage '{}' is bound to more than one hop", hop.from),
                    vec![hop.from.clone()],
                    "A target resolves to at most one downstream stage.",
                ));
            }
        }

        for stage in &self.stages {
            let logic_targets = stage.meta.targets();
            for name in &logic_targets {
                if !declared.contains(&(stage.name.as_str(), name.as_str())) {
                    return Err(BuildError::undeclared_target(&stage.name, name));
                }
            }
            for decl in self.targets.iter().filter(|d| d.stage == stage.name) {
                if !logic_targets.contains(&decl.name) {
                    return Err(graph_error(
                        "GRAPH-UNKNOWN-TARGET",
                        format!(
                            "Stage '{}' never sends rows to declared target '{}'",
                            stage.name, decl.name
                        ),
                        vec![stage.name.clone()],
                        "Remove the declaration or use a stage that emits this target.",
                    ));
                }
            }
            if !logic_targets.is_empty()
                && self
                    .enabled_hops()
                    .any(|h| h.from == stage.name && h.is_default())
            {
                return Err(graph_error(
                    "GRAPH-MIXED-OUTPUT",
                    format!(
                        "Stage '{}' routes to named targets and cannot have default hops",
                        stage.name
                    ),
                    vec![stage.name.clone()],
                    "Bind every outgoing hop of this stage to one of its targets.",
                ));
            }
        }
        Ok(())
    }

    fn detect_cycles(&self) -> Result<(), BuildError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for stage in &self.stages {
            if !visited.contains(stage.name.as_str()) {
                if let Some(cycle) =
                    self.dfs_cycle(&stage.name, &mut visited, &mut rec_stack, &mut path)
                {
                    return Err(BuildError::cycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for hop in self.enabled_hops().filter(|h| h.from == node) {
            let next = hop.to.as_str();
            if !visited.contains(next) {
                if let Some(cycle) = self.dfs_cycle(next, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(next) {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    fn topological_order(&self) -> Vec<String> {
        let mut indegree: HashMap<&str, usize> =
            self.stages.iter().map(|s| (s.name.as_str(), 0)).collect();
        for hop in self.enabled_hops() {
            if let Some(d) = indegree.get_mut(hop.to.as_str()) {
                *d += 1;
            }
        }
        let mut ready: VecDeque<&str> = self
            .stages
            .iter()
            .map(|s| s.name.as_str())
            .filter(|n| indegree.get(n) == Some(&0))
            .collect();

        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(name) = ready.pop_front() {
            order.push(name.to_string());
            for hop in self.enabled_hops().filter(|h| h.from == name) {
                if let Some(d) = indegree.get_mut(hop.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(hop.to.as_str());
                    }
                }
            }
        }
        order
    }

    fn plan_shapes(&self) -> Result<GraphPlan, BuildError> {
        let mut plan = GraphPlan {
            order: self.topological_order(),
            ..GraphPlan::default()
        };

        for name in plan.order.clone() {
            let Some(stage) = self.stage(&name) else {
                continue;
            };
            let incoming: Vec<(&HopDef, Arc<RowShape>)> = self
                .enabled_hops()
                .filter(|h| h.to == name)
                .filter_map(|h| plan.hop_shape(h).map(|shape| (h, shape)))
                .collect();

            let separate = stage.meta.reads_inputs_separately();
            if let Some((first_hop, first)) = incoming.first() {
                if !separate {
                    for (hop, shape) in &incoming[1..] {
                        if !first.is_compatible(shape) {
                            return Err(graph_error(
                                "GRAPH-SHAPE-MISMATCH",
                                format!(
                                    "Stage '{name}' receives {first} from '{}' but {shape} from '{}'",
                                    first_hop.from, hop.from
                                ),
                                vec![name.clone(), first_hop.from.clone(), hop.from.clone()],
                                "Make every input of the stage produce the same fields in the same order.",
                            ));
                        }
                    }
                }
                plan.inputs.insert(name.clone(), Arc::clone(first));
            }

            let input = plan.inputs.get(&name).cloned();
            let output = stage.meta.output_shape(input.as_deref()).map_err(|e| {
                graph_error(
                    "GRAPH-OUTPUT-SHAPE",
                    format!("Stage '{name}' cannot derive its output shape: {e}"),
                    vec![name.clone()],
                    "Check the fields the stage adds against its input.",
                )
            })?;
            plan.outputs.insert(name.clone(), Arc::new(output));

            for hop in self.enabled_hops().filter(|h| h.from == name) {
                if let Distribution::Partitioned { field } = &hop.distribution {
                    let shape = plan.hop_shape(hop).unwrap_or_default();
                    if shape.index_of(field).is_none() {
                        return Err(graph_error(
                            "GRAPH-PARTITION-FIELD",
                            format!(
                                "Hop '{}' -> '{}' partitions on unknown field '{field}'",
                                hop.from, hop.to
                            ),
                            vec![hop.from.clone(), hop.to.clone()],
                            "Partition on a field of the producer's output.",
                        ));
                    }
                }
            }
        }
        Ok(plan)
    }
}
