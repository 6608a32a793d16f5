use gatherplan::collective::{
    Blob, CollectiveError, CollectiveTransport, GatherOp, LocalTransport, TimeoutPolicy,
};
use pretty_assertions::assert_eq;
use std::thread;
use std::time::Duration;

fn gather_op() -> GatherOp {
    GatherOp::new(
        "gather_fc_to_loss",
        vec!["fc".to_string()],
        vec!["gathered_fc".to_string()],
    )
    .unwrap()
}

/// Run `f` on every rank of a fresh group and collect the results in rank order.
fn on_group<F, R>(world_size: usize, f: F) -> Vec<R>
where
    F: Fn(LocalTransport) -> R + Send + Sync + Copy + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = LocalTransport::group(world_size, TimeoutPolicy::Block)
        .unwrap()
        .into_iter()
        .map(|t| thread::spawn(move || f(t)))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn local_shard(rank: usize, rows: usize) -> Blob<f32> {
    let data = (0..rows * 3).map(|i| (rank * 100 + i) as f32).collect();
    Blob::new(data, vec![rows, 3]).unwrap()
}

#[test]
fn scatter_inverts_all_gather_for_every_world_size() {
    for world_size in 1..=4 {
        let results = on_group(world_size, |t| {
            let x = local_shard(t.rank(), 2);
            let mut op = gather_op();
            let top = op.forward(&t, std::slice::from_ref(&x)).unwrap();
            let back = op.backward(&t, &top).unwrap();
            (x, top.into_iter().next().unwrap(), back.into_iter().next().unwrap())
        });

        let first_top = results[0].1.clone();
        assert_eq!(first_top.shape(), [2 * world_size, 3]);
        for (x, top, back) in results {
            // Every rank sees the same gathered blob.
            assert_eq!(top, first_top);
            assert_eq!(back, x);
        }
    }
}

#[test]
fn shapes_can_change_between_iterations() {
    let results = on_group(2, |t| {
        let mut op = gather_op();
        let mut seen = Vec::new();
        for rows in [1, 4, 2] {
            let x = local_shard(t.rank(), rows);
            let top = op.forward(&t, std::slice::from_ref(&x)).unwrap();
            seen.push(op.top_shapes().unwrap()[0].clone());
            let back = op.backward(&t, &top).unwrap();
            assert_eq!(back, vec![x]);
        }
        seen
    });
    for seen in results {
        assert_eq!(seen, vec![vec![2, 3], vec![8, 3], vec![4, 3]]);
    }
}

#[test]
fn mismatched_gradient_fails_on_every_rank_without_hanging() {
    // A deadline makes a regression show up as a timeout, not a stuck test.
    let group = LocalTransport::group(3, TimeoutPolicy::After(Duration::from_secs(5))).unwrap();
    let handles: Vec<_> = group
        .into_iter()
        .map(|t| {
            thread::spawn(move || {
                let mut op = gather_op();
                op.forward(&t, &[local_shard(t.rank(), 2)]).unwrap();
                let stale = local_shard(t.rank(), 2);
                op.backward(&t, &[stale]).unwrap_err()
            })
        })
        .collect();

    for h in handles {
        match h.join().unwrap() {
            CollectiveError::ShapeMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, vec![6, 3]);
                assert_eq!(actual, vec![2, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
