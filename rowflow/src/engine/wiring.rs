//! Turns a validated graph into nodes and channels.

use super::EngineConfig;
use crate::cancellation::CancellationToken;
use crate::channel::{Channel, ChannelId};
use crate::core::{NodeId, NodeState};
use crate::errors::BuildError;
use crate::node::{Node, NodeMetrics};
use crate::pipeline::{GraphDescription, GraphPlan, HopDef};
use crate::routing::{OutputGroup, Router};
use crate::stages::{ContextParts, NodeSettings, StepContext};
use dashmap::DashMap;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct Wired {
    pub(crate) nodes: Vec<Node>,
    pub(crate) channels: Vec<Arc<Channel>>,
    pub(crate) metrics: Vec<(NodeId, Arc<NodeMetrics>)>,
}

/// Channels of one hop keyed by (producer copy, consumer copy).
type HopChannels = Vec<((usize, usize), Arc<Channel>)>;

/// Producer/consumer copy pairs connected by a hop.
///
/// Equal copy counts on an unpartitioned hop connect copy `c` to copy `c`;
/// any other combination connects every pair.
pub(crate) fn copy_pairs(hop: &HopDef, producers: usize, consumers: usize) -> Vec<(usize, usize)> {
    if producers == consumers && !hop.distribution.is_partitioned() {
        (0..producers).map(|c| (c, c)).collect()
    } else {
        (0..producers)
            .flat_map(|p| (0..consumers).map(move |c| (p, c)))
            .collect()
    }
}

pub(crate) fn wire(
    desc: &GraphDescription,
    plan: &GraphPlan,
    config: &EngineConfig,
    cancel: &Arc<CancellationToken>,
    states: &Arc<DashMap<NodeId, NodeState>>,
) -> Result<Wired, BuildError> {
    let default_capacity = config.capacity()?;
    let settings = NodeSettings {
        poll_interval: config.poll_interval(),
        rows_per_block: config.rows_per_input_block,
        feedback_interval: config.feedback_interval,
        safe_mode: config.safe_mode,
    };

    let copies: HashMap<&str, usize> = desc
        .stages
        .iter()
        .map(|s| (s.name.as_str(), s.copies))
        .collect();

    let mut hop_channels: Vec<(&HopDef, HopChannels)> = Vec::new();
    let mut all_channels = Vec::new();
    for hop in desc.enabled_hops() {
        let producers = copies.get(hop.from.as_str()).copied().unwrap_or(0);
        let consumers = copies.get(hop.to.as_str()).copied().unwrap_or(0);
        let capacity = hop
            .capacity
            .and_then(NonZeroUsize::new)
            .unwrap_or(default_capacity);

        let mut channels = Vec::new();
        for (p, c) in copy_pairs(hop, producers, consumers) {
            let mut id = ChannelId::new(&hop.from, p, &hop.to, c);
            if let Some(target) = &hop.target {
                id = id.with_target(target);
            }
            let channel = Arc::new(Channel::new(
                id,
                capacity,
                Arc::clone(cancel),
                config.poll_interval(),
            ));
            all_channels.push(Arc::clone(&channel));
            channels.push(((p, c), channel));
        }
        debug!(
            from = %hop.from,
            to = %hop.to,
            channels = channels.len(),
            distribution = %hop.distribution,
            "Wired hop"
        );
        hop_channels.push((hop, channels));
    }

    let group_for = |hop: &HopDef, channels: &HopChannels, copy: usize| {
        let chans = channels
            .iter()
            .filter(|((p, _), _)| *p == copy)
            .map(|(_, ch)| Arc::clone(ch))
            .collect();
        OutputGroup::new(hop.to.clone(), chans, hop.distribution.clone())
    };

    let mut nodes = Vec::with_capacity(desc.node_count());
    let mut metrics = Vec::with_capacity(desc.node_count());
    for stage in &desc.stages {
        let logic_targets = stage.meta.targets();
        for copy in 0..stage.copies {
            let id = NodeId::new(&stage.name, copy);

            let inputs: Vec<Arc<Channel>> = hop_channels
                .iter()
                .filter(|(hop, _)| hop.to == stage.name)
                .flat_map(|(_, chans)| {
                    chans
                        .iter()
                        .filter(|((_, c), _)| *c == copy)
                        .map(|(_, ch)| Arc::clone(ch))
                })
                .collect();

            let outgoing = hop_channels
                .iter()
                .filter(|(hop, _)| hop.from == stage.name);
            let mut router = if logic_targets.is_empty() {
                Router::default_flow(
                    outgoing
                        .clone()
                        .filter(|(hop, _)| hop.is_default())
                        .map(|(hop, chans)| group_for(*hop, chans, copy))
                        .collect(),
                )
            } else {
                Router::named(
                    logic_targets
                        .iter()
                        .map(|name| {
                            let group = outgoing
                                .clone()
                                .find(|(hop, _)| hop.target.as_deref() == Some(name.as_str()))
                                .map(|(hop, chans)| group_for(*hop, chans, copy));
                            (name.clone(), group)
                        })
                        .collect(),
                )
            };
            if let Some((hop, chans)) = outgoing.clone().find(|(hop, _)| hop.error) {
                router = router.with_error_group(group_for(*hop, chans, copy));
            }
            let terminal = !router.has_outputs();

            let node_metrics = Arc::new(NodeMetrics::new());
            let ctx = StepContext::new(ContextParts {
                node: id.clone(),
                meta: Arc::clone(&stage.meta),
                inputs,
                router,
                planned_input: plan.input_shape(&stage.name).cloned(),
                error_handling: stage.error_handling.clone(),
                metrics: Arc::clone(&node_metrics),
                cancel: Arc::clone(cancel),
                settings: settings.clone(),
            });

            metrics.push((id.clone(), Arc::clone(&node_metrics)));
            nodes.push(Node::new(
                id,
                stage.meta.create(copy),
                ctx,
                Arc::clone(states),
                node_metrics,
                Arc::clone(cancel),
                terminal,
            ));
        }
    }

    Ok(Wired {
        nodes,
        channels: all_channels,
        metrics,
    })
}
