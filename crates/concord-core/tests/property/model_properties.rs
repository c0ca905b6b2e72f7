use concord_core::constants::SUPPORTED_VERSION;
use concord_core::errors::BaseError;
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::{Node, NodeId};
use proptest::prelude::*;

fn writer_key() -> impl Strategy<Value = WriterKey> {
    any::<[u8; 32]>().prop_map(WriterKey::from_bytes)
}

fn node(version: impl Strategy<Value = u32>) -> impl Strategy<Value = Node> {
    (
        writer_key(),
        0u64..1_000,
        1u32..8,
        prop::collection::vec((writer_key(), 0u64..1_000), 0..4),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
        1u64..10_000,
        version,
    )
        .prop_map(|(writer, seq, batch, heads, value, height, version)| Node {
            writer,
            seq,
            batch,
            heads: heads
                .into_iter()
                .map(|(writer, seq)| NodeId::new(writer, seq))
                .collect(),
            value,
            height,
            version,
        })
}

proptest! {
    #[test]
    fn view_keys_ignore_indexer_order_and_duplicates(
        bootstrap in writer_key(),
        name in "[a-z]{1,12}",
        indexers in prop::collection::vec(writer_key(), 1..6),
    ) {
        let mut shuffled = indexers.clone();
        shuffled.reverse();
        shuffled.push(indexers[0]);
        prop_assert_eq!(
            CoreKey::for_view(&bootstrap, &name, &indexers),
            CoreKey::for_view(&bootstrap, &name, &shuffled)
        );
    }

    #[test]
    fn view_keys_move_with_the_indexer_set_and_name(
        bootstrap in writer_key(),
        name in "[a-z]{1,12}",
        indexers in prop::collection::vec(writer_key(), 1..6),
        extra in writer_key(),
    ) {
        prop_assume!(!indexers.contains(&extra));
        let key = CoreKey::for_view(&bootstrap, &name, &indexers);

        let mut grown = indexers.clone();
        grown.push(extra);
        prop_assert_ne!(key, CoreKey::for_view(&bootstrap, &name, &grown));

        let renamed = format!("{name}_");
        prop_assert_ne!(key, CoreKey::for_view(&bootstrap, &renamed, &indexers));
    }

    #[test]
    fn supported_nodes_decode_as_written(node in node(0..=SUPPORTED_VERSION)) {
        let block = node.encode().unwrap();
        let decoded = Node::decode(node.writer, node.seq, &block).unwrap();
        prop_assert_eq!(decoded, node);
    }

    #[test]
    fn newer_nodes_require_an_upgrade(
        node in node(SUPPORTED_VERSION + 1..SUPPORTED_VERSION + 100),
    ) {
        let block = node.encode().unwrap();
        let err = Node::decode(node.writer, node.seq, &block).unwrap_err();
        prop_assert!(
            matches!(err, BaseError::UpgradeRequired { version, .. } if version == node.version),
            "{}",
            err
        );
    }
}
