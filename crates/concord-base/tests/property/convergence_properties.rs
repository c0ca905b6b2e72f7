use std::collections::BTreeSet;

use anyhow::ensure;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use test_fixtures::{add_writer, compare, confirm, create, sync, values, ListBase};

const WRITERS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Append { writer: usize, count: usize },
    Ack { writer: usize },
    Sync,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..WRITERS, 1usize..3).prop_map(|(writer, count)| Op::Append { writer, count }),
        1 => (0..WRITERS).prop_map(|writer| Op::Ack { writer }),
        2 => Just(Op::Sync),
    ]
}

/// Confirmed state only grows: the list seen before is a prefix of the
/// list seen now and the indexed length never shrinks.
fn check_growth(
    bases: &[ListBase],
    lists: &mut [Vec<String>],
    lengths: &mut [u64],
) -> anyhow::Result<()> {
    for (i, base) in bases.iter().enumerate() {
        let list = values(base)?;
        ensure!(
            list.starts_with(&lists[i]),
            "base {i} rewrote confirmed values: {:?} -> {list:?}",
            lists[i]
        );
        let length = base.indexed_length();
        ensure!(length >= lengths[i], "base {i} indexed length shrank");
        lists[i] = list;
        lengths[i] = length;
    }
    Ok(())
}

async fn run(ops: Vec<Op>) -> anyhow::Result<()> {
    let bases = create(WRITERS).await?;
    add_writer(&bases[0], &bases[1], true).await?;
    add_writer(&bases[0], &bases[2], false).await?;
    confirm(&bases).await?;

    let mut lists = vec![Vec::new(); WRITERS];
    let mut lengths = vec![0; WRITERS];
    check_growth(&bases, &mut lists, &mut lengths)?;

    let mut appended = BTreeSet::new();
    for op in ops {
        match op {
            Op::Append { writer, count } => {
                let mut batch = Vec::with_capacity(count);
                for _ in 0..count {
                    let value = format!("v{}", appended.len());
                    appended.insert(value.clone());
                    batch.push(value);
                }
                bases[writer].append_batch(batch).await?;
            }
            Op::Ack { writer } => bases[writer].ack(false).await?,
            Op::Sync => sync(&bases).await?,
        }
        check_growth(&bases, &mut lists, &mut lengths)?;
    }

    confirm(&bases).await?;
    check_growth(&bases, &mut lists, &mut lengths)?;
    compare(&bases)?;

    let list = values(&bases[0])?;
    let unique: BTreeSet<String> = list.iter().cloned().collect();
    ensure!(unique.len() == list.len(), "a value was applied twice: {list:?}");
    ensure!(unique == appended, "values lost: {unique:?} != {appended:?}");
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn instances_converge_on_one_stable_order(ops in prop::collection::vec(op(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        runtime
            .block_on(run(ops))
            .map_err(|e| TestCaseError::fail(format!("{e:#}")))?;
    }
}
