use concord_core::keys::WriterKey;
use concord_core::models::{Node, NodeId};
use concord_dag::Linearizer;

fn key(n: u8) -> WriterKey {
    WriterKey::from_bytes([n; 32])
}

/// Next node of `writer`, stamped with the height the linearizer expects.
fn node(lin: &Linearizer, writer: WriterKey, heads: &[NodeId], value: Option<&str>) -> Node {
    Node {
        writer,
        seq: lin.merged_length(&writer),
        batch: 1,
        heads: heads.to_vec(),
        value: value.map(|v| v.as_bytes().to_vec()),
        height: lin.next_height(&writer, heads),
        version: 1,
    }
}

fn push(lin: &mut Linearizer, writer: WriterKey, heads: &[NodeId], value: Option<&str>) {
    let n = node(lin, writer, heads, value);
    lin.add_head(n).unwrap();
}

fn id(writer: WriterKey, seq: u64) -> NodeId {
    NodeId::new(writer, seq)
}

fn linearizer(indexers: &[WriterKey]) -> Linearizer {
    let mut lin = Linearizer::new(indexers[0], indexers.to_vec(), vec![], 0);
    for k in indexers {
        lin.add_writer(*k, 0, 0);
    }
    lin
}

fn values(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| n.value.as_ref())
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .collect()
}

#[test]
fn single_indexer_confirms_in_append_order() {
    let a = key(1);
    let mut lin = linearizer(&[a]);
    push(&mut lin, a, &[], Some("x"));
    push(&mut lin, a, &[id(a, 0)], Some("y"));
    push(&mut lin, a, &[id(a, 1)], Some("z"));

    let batch = lin.update().unwrap();
    assert_eq!(batch.start, 0);
    assert_eq!(batch.end(), 3);
    assert_eq!(values(&batch.nodes), vec!["x", "y", "z"]);
    assert!(lin.update().is_none());
    assert_eq!(lin.unconfirmed(), 0);
}

#[test]
fn two_indexers_need_mutual_observation() {
    let (a, b) = (key(1), key(2));
    let mut lin = linearizer(&[a, b]);
    assert_eq!(lin.majority(), 2);

    push(&mut lin, a, &[], Some("a-value"));
    assert!(lin.update().is_none(), "only the author observed it");

    push(&mut lin, b, &[id(a, 0)], Some("b-value"));
    let batch = lin.update().unwrap();
    assert_eq!(values(&batch.nodes), vec!["a-value"]);
    assert!(lin.update().is_none());

    push(&mut lin, a, &[id(b, 0)], None);
    let batch = lin.update().unwrap();
    assert_eq!(batch.start, 1);
    assert_eq!(values(&batch.nodes), vec!["b-value"]);
    assert!(lin.update().is_none(), "the ack itself is still unobserved by b");

    push(&mut lin, b, &[id(a, 1)], None);
    let batch = lin.update().unwrap();
    assert_eq!(batch.nodes.len(), 1);
    assert_eq!(batch.nodes[0].id(), id(a, 1));
    assert_eq!(lin.indexed_length(), 3);
}

#[test]
fn minority_observation_never_confirms() {
    let (a, b, c) = (key(1), key(2), key(3));
    let mut lin = linearizer(&[a, b, c]);
    push(&mut lin, a, &[], Some("v"));
    push(&mut lin, a, &[id(a, 0)], None);
    push(&mut lin, a, &[id(a, 1)], None);
    assert!(lin.update().is_none());
    assert_eq!(lin.unconfirmed(), 3);
}

#[test]
fn silent_minority_does_not_block_progress() {
    let (a, b, c) = (key(1), key(2), key(3));
    let mut lin = linearizer(&[a, b, c]);
    push(&mut lin, a, &[], Some("v"));
    push(&mut lin, a, &[id(a, 0)], Some("w"));
    push(&mut lin, c, &[id(a, 1)], None);
    assert!(lin.update().is_none(), "c's node could still be undercut");

    push(&mut lin, a, &[id(c, 0)], None);
    push(&mut lin, c, &[id(a, 2)], None);
    let batch = lin.update().unwrap();
    assert_eq!(values(&batch.nodes), vec!["v", "w"]);
    assert_eq!(batch.nodes.last().map(Node::id), Some(id(c, 0)));
    assert!(lin.unconfirmed() < 3);
}

#[test]
fn non_indexer_values_confirm_once_indexers_observe_them() {
    let (a, w) = (key(1), key(9));
    let mut lin = linearizer(&[a]);
    lin.add_writer(w, 0, 0);
    push(&mut lin, w, &[], Some("from-w"));
    assert!(lin.update().is_none());

    push(&mut lin, a, &[id(w, 0)], None);
    let batch = lin.update().unwrap();
    assert_eq!(batch.nodes[0].id(), id(w, 0));
    assert_eq!(batch.nodes[1].id(), id(a, 0));
}

#[test]
fn concurrent_nodes_tie_break_by_writer_key() {
    let (a, b) = (key(1), key(2));
    let mut lin = linearizer(&[a, b]);
    push(&mut lin, b, &[], Some("b"));
    push(&mut lin, a, &[], Some("a"));
    push(&mut lin, a, &[id(a, 0), id(b, 0)], None);
    push(&mut lin, b, &[id(a, 0), id(b, 0)], None);

    let batch = lin.update().unwrap();
    assert_eq!(values(&batch.nodes), vec!["a", "b"]);
}

#[test]
fn co_appended_groups_stay_contiguous() {
    let (a, b) = (key(1), key(2));
    let mut lin = linearizer(&[a, b]);
    let mut first = node(&lin, a, &[], Some("a0"));
    first.batch = 3;
    lin.add_head(first).unwrap();
    let mut second = node(&lin, a, &[id(a, 0)], Some("a1"));
    second.batch = 2;
    lin.add_head(second).unwrap();
    push(&mut lin, a, &[id(a, 1)], Some("a2"));
    push(&mut lin, b, &[], Some("b0"));
    push(&mut lin, b, &[id(a, 2), id(b, 0)], None);
    push(&mut lin, a, &[id(b, 1)], None);

    let batch = lin.update().unwrap();
    let order = values(&batch.nodes);
    let start = order.iter().position(|v| v == "a0").unwrap();
    assert_eq!(&order[start..start + 3], &["a0", "a1", "a2"]);
    assert_eq!(batch.groups().iter().filter(|g| g.len() == 3).count(), 1);
}

#[test]
fn heads_are_the_sorted_uncovered_frontier() {
    let (a, b) = (key(1), key(2));
    let mut lin = linearizer(&[a, b]);
    push(&mut lin, b, &[], None);
    push(&mut lin, a, &[], None);
    assert_eq!(lin.get_heads(), vec![id(a, 0), id(b, 0)]);

    push(&mut lin, a, &[id(b, 0)], None);
    assert_eq!(lin.get_heads(), vec![id(a, 1)]);
}

#[test]
fn add_head_rejects_gaps_missing_deps_and_unknown_writers() {
    let (a, b) = (key(1), key(2));
    let mut lin = linearizer(&[a]);
    let mut gap = node(&lin, a, &[], None);
    gap.seq = 1;
    assert!(lin.add_head(gap).is_err());
    assert!(lin.add_head(node(&lin, a, &[id(b, 0)], None)).is_err());
    assert!(lin.add_head(node(&lin, b, &[], None)).is_err());
    assert_eq!(lin.unconfirmed(), 0);
}

#[test]
fn add_head_rejects_heights_not_above_dependencies() {
    let a = key(1);
    let mut lin = linearizer(&[a]);
    push(&mut lin, a, &[], None);
    let mut flat = node(&lin, a, &[id(a, 0)], None);
    flat.height = 1;
    assert!(lin.add_head(flat).is_err());
    assert_eq!(lin.merged_length(&a), 1);
}

#[test]
fn should_ack_tracks_lag_behind_the_frontier() {
    let (a, b) = (key(1), key(2));
    let mut lin = linearizer(&[a, b]);
    push(&mut lin, a, &[], Some("v"));
    assert!(!lin.should_ack(&a, false), "author already observes its node");
    assert!(lin.should_ack(&b, false));
    assert!(!lin.should_ack(&key(7), true), "non-indexers never ack");

    push(&mut lin, b, &[id(a, 0)], None);
    lin.update();
    assert!(!lin.should_ack(&b, false));
    assert!(!lin.should_ack(&a, false), "no unconfirmed values left");
    assert!(lin.should_ack(&a, true), "forced ack ignores the value check");
}

#[test]
fn resumes_from_confirmed_heads() {
    let a = key(1);
    let mut lin = Linearizer::new(a, vec![a], vec![id(a, 4)], 5);
    lin.add_writer(a, 5, 5);
    assert!(lin.contains(&id(a, 4)));
    assert!(lin.is_confirmed(&id(a, 4)));
    push(&mut lin, a, &[id(a, 4)], Some("next"));
    assert_eq!(lin.get_heads(), vec![id(a, 5)]);
    let batch = lin.update().unwrap();
    assert_eq!(batch.start, 5);
    assert_eq!(lin.indexed_length(), 6);
}

#[test]
fn empty_indexer_set_falls_back_to_bootstrap() {
    let a = key(1);
    let lin = Linearizer::new(a, vec![], vec![], 0);
    assert_eq!(lin.indexers(), &[a]);
    assert_eq!(lin.bootstrap_writers(), vec![a]);
}

#[test]
fn writers_with_unconfirmed_nodes_are_not_removed() {
    let (a, w) = (key(1), key(2));
    let mut lin = linearizer(&[a]);
    lin.add_writer(w, 0, 0);
    push(&mut lin, w, &[], Some("x"));
    assert!(!lin.remove_writer(&w));
    push(&mut lin, a, &[id(w, 0)], None);
    lin.update().unwrap();
    assert!(lin.remove_writer(&w));
    assert!(!lin.has_writer(&w));
}
