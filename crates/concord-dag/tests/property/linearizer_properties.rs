use std::collections::{HashMap, HashSet};

use concord_core::keys::WriterKey;
use concord_core::models::{Node, NodeId};
use concord_dag::Linearizer;
use proptest::prelude::*;

const INDEXERS: usize = 3;
const WRITERS: usize = 4;

#[derive(Debug, Clone)]
struct Step {
    writer: usize,
    sees: [bool; WRITERS],
    value: bool,
    size: u32,
}

fn key(n: usize) -> WriterKey {
    WriterKey::from_bytes([n as u8 + 1; 32])
}

fn step() -> impl Strategy<Value = Step> {
    (0..WRITERS, any::<[bool; WRITERS]>(), any::<bool>(), 1u32..3).prop_map(
        |(writer, sees, value, size)| Step {
            writer,
            sees,
            value,
            size,
        },
    )
}

/// Builds the DAG described by `steps`, one group per step.
fn build(steps: &[Step]) -> Vec<Vec<Node>> {
    let mut latest: Vec<Option<(NodeId, u64)>> = vec![None; WRITERS];
    let mut groups = Vec::new();
    for (n, step) in steps.iter().enumerate() {
        let writer = key(step.writer);
        let heads: Vec<NodeId> = (0..WRITERS)
            .filter(|o| *o != step.writer && step.sees[*o])
            .filter_map(|o| latest[o].map(|(id, _)| id))
            .collect();
        let mut height = (0..WRITERS)
            .filter(|o| *o == step.writer || step.sees[*o])
            .filter_map(|o| latest[o].map(|(_, h)| h))
            .max()
            .unwrap_or(0);
        let mut seq = latest[step.writer].map_or(0, |(id, _)| id.seq + 1);
        let mut group = Vec::new();
        for i in 0..step.size {
            height += 1;
            group.push(Node {
                writer,
                seq,
                batch: step.size - i,
                heads: if i == 0 {
                    heads.clone()
                } else {
                    vec![NodeId::new(writer, seq - 1)]
                },
                value: step.value.then(|| format!("{n}/{i}").into_bytes()),
                height,
                version: 1,
            });
            latest[step.writer] = Some((NodeId::new(writer, seq), height));
            seq += 1;
        }
        groups.push(group);
    }
    groups
}

/// Feeds groups in a causal order picked by `choices`, updating whenever a
/// choice is odd. Returns everything confirmed.
fn linearize(groups: &[Vec<Node>], choices: &[usize]) -> Vec<NodeId> {
    let indexers: Vec<WriterKey> = (0..INDEXERS).map(key).collect();
    let mut lin = Linearizer::new(indexers[0], indexers, vec![], 0);
    for w in 0..WRITERS {
        lin.add_writer(key(w), 0, 0);
    }

    let mut pending: Vec<usize> = (0..groups.len()).collect();
    let mut added: HashSet<NodeId> = HashSet::new();
    let mut output = Vec::new();
    let mut round = 0;
    while !pending.is_empty() {
        let ready: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|g| {
                let first = &groups[*g][0];
                first.heads.iter().chain(first.id().prev().as_ref()).all(|d| added.contains(d))
            })
            .collect();
        let choice = choices.get(round).copied().unwrap_or(0);
        let pick = ready[choice % ready.len()];
        pending.retain(|g| *g != pick);
        for node in &groups[pick] {
            added.insert(node.id());
            lin.add_head(node.clone()).unwrap();
        }
        if choice % 2 == 1 {
            if let Some(batch) = lin.update() {
                output.extend(batch.nodes.iter().map(Node::id));
            }
        }
        round += 1;
    }
    while let Some(batch) = lin.update() {
        output.extend(batch.nodes.iter().map(Node::id));
    }
    output
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arrival_order_does_not_change_the_result(
        steps in prop::collection::vec(step(), 1..40),
        first in prop::collection::vec(any::<usize>(), 40),
        second in prop::collection::vec(any::<usize>(), 40),
    ) {
        let groups = build(&steps);
        let a = linearize(&groups, &first);
        let b = linearize(&groups, &second);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn confirmed_order_respects_causality(
        steps in prop::collection::vec(step(), 1..40),
        choices in prop::collection::vec(any::<usize>(), 40),
    ) {
        let groups = build(&steps);
        let by_id: HashMap<NodeId, &Node> = groups.iter().flatten().map(|n| (n.id(), n)).collect();
        let order = linearize(&groups, &choices);
        let mut seen = HashSet::new();
        for id in &order {
            let node = by_id[id];
            for dep in node.heads.iter().chain(id.prev().as_ref()) {
                prop_assert!(seen.contains(dep), "{:?} before its dependency {:?}", id, dep);
            }
            prop_assert!(seen.insert(*id), "{:?} confirmed twice", id);
        }
    }

    #[test]
    fn co_appended_groups_are_never_split(
        steps in prop::collection::vec(step(), 1..40),
        choices in prop::collection::vec(any::<usize>(), 40),
    ) {
        let groups = build(&steps);
        let by_id: HashMap<NodeId, &Node> = groups.iter().flatten().map(|n| (n.id(), n)).collect();
        let order = linearize(&groups, &choices);
        for pair in order.windows(2) {
            let node = by_id[&pair[0]];
            if !node.ends_group() {
                prop_assert_eq!(pair[1], NodeId::new(node.writer, node.seq + 1));
            }
        }
        if let Some(last) = order.last() {
            prop_assert!(by_id[last].ends_group());
        }
    }
}
