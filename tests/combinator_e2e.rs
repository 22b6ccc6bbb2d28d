//! End-to-end tests for the combinator family.

mod common;

use common::{collect_updates, init_test};
use conflux::{
    Capacity, Error, Executor, FlatteningBehavior, channel, combine_latest, concat, debounce,
    flat_map_future, future, merge, suspendable, zip,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn zip_pairing_is_exact_under_threaded_interleaving() {
    init_test("zip_pairing_is_exact_under_threaded_interleaving");

    let (tx_a, rx_a) = channel::<u32, ()>(Capacity::Unbounded);
    let (tx_b, rx_b) = channel::<u32, ()>(Capacity::Unbounded);
    let zipped = zip(&rx_a, &rx_b);
    let seen = collect_updates(&zipped);

    let left = std::thread::spawn(move || {
        for i in 0..100 {
            tx_a.update(i).unwrap();
        }
        tx_a.succeed(());
    });
    let right = std::thread::spawn(move || {
        for i in 0..100 {
            tx_b.update(i * 2).unwrap();
            if i % 16 == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        tx_b.succeed(());
    });
    left.join().unwrap();
    right.join().unwrap();

    assert!(matches!(zipped.wait(), Ok(((), ()))));
    let pairs = seen.lock().unwrap();
    assert_eq!(pairs.len(), 100);
    for (index, (a, b)) in pairs.iter().enumerate() {
        let index = u32::try_from(index).unwrap();
        assert_eq!((*a, *b), (index, index * 2), "pair {index} mismatched");
    }
    conflux::test_complete!("zip_pairing_is_exact_under_threaded_interleaving");
}

#[test]
fn combine_latest_emits_nothing_until_full_coverage() {
    init_test("combine_latest_emits_nothing_until_full_coverage");

    let mut producers = Vec::new();
    let mut channels = Vec::new();
    for _ in 0..4 {
        let (tx, rx) = channel::<u32, ()>(Capacity::Unbounded);
        producers.push(tx);
        channels.push(rx);
    }
    let combined = combine_latest(channels);
    let seen = collect_updates(&combined);

    for (i, tx) in producers.iter().take(3).enumerate() {
        tx.update(u32::try_from(i).unwrap()).unwrap();
    }
    assert!(seen.lock().unwrap().is_empty(), "emitted before coverage");

    producers[3].update(3).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![vec![0, 1, 2, 3]]);

    producers[1].update(10).unwrap();
    assert_eq!(seen.lock().unwrap().last().unwrap(), &vec![0, 10, 2, 3]);
    conflux::test_complete!("combine_latest_emits_nothing_until_full_coverage");
}

#[test]
fn debounce_quiescence_matches_the_two_cluster_shape() {
    init_test("debounce_quiescence_matches_the_two_cluster_shape");

    let (tx, rx) = channel::<u32, ()>(Capacity::Unbounded);
    let debounced = debounce(&rx, Duration::from_millis(250));

    let stamped: Arc<Mutex<Vec<(u32, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&stamped);
    let _sub = debounced.on_update(Executor::immediate(), move |value| {
        sink.lock().unwrap().push((value, Instant::now()));
    });

    // Cluster at t = 0, 25, 50ms, then an isolated update at t = 350ms.
    let start = Instant::now();
    tx.update(1).unwrap();
    std::thread::sleep(Duration::from_millis(25));
    tx.update(2).unwrap();
    std::thread::sleep(Duration::from_millis(25));
    tx.update(3).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    tx.update(4).unwrap();
    std::thread::sleep(Duration::from_millis(320));
    tx.succeed(());

    assert!(matches!(debounced.wait(), Ok(())));
    let emissions = stamped.lock().unwrap();
    let values: Vec<u32> = emissions.iter().map(|(v, _)| *v).collect();
    conflux::assert_with_log!(
        values == vec![3, 4],
        "exactly two emissions",
        vec![3u32, 4],
        &values
    );

    // First emission ~300ms (cluster end + interval), second ~600ms.
    let first_at = emissions[0].1.duration_since(start);
    let second_at = emissions[1].1.duration_since(start);
    assert!(first_at >= Duration::from_millis(290), "first at {first_at:?}");
    assert!(second_at >= Duration::from_millis(590), "second at {second_at:?}");
    conflux::test_complete!("debounce_quiescence_matches_the_two_cluster_shape");
}

#[test]
fn flatten_order_results_reorders_to_update_order() {
    init_test("flatten_order_results_reorders_to_update_order");

    let (tx, rx) = channel::<usize, ()>(Capacity::Unbounded);
    let latencies = [50u64, 150, 100];
    let flattened = flat_map_future(
        &rx,
        Executor::immediate(),
        FlatteningBehavior::OrderResults,
        move |i| future::after(Duration::from_millis(latencies[i]), i),
    );
    let seen = collect_updates(&flattened);

    tx.update(0).unwrap();
    tx.update(1).unwrap();
    tx.update(2).unwrap();
    tx.succeed(());

    assert!(matches!(flattened.wait(), Ok(())));
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    conflux::test_complete!("flatten_order_results_reorders_to_update_order");
}

#[test]
fn flatten_drop_out_of_order_discards_superseded_results() {
    init_test("flatten_drop_out_of_order_discards_superseded_results");

    let (tx, rx) = channel::<usize, ()>(Capacity::Unbounded);
    let latencies = [50u64, 150, 100];
    let flattened = flat_map_future(
        &rx,
        Executor::immediate(),
        FlatteningBehavior::DropResultsOutOfOrder,
        move |i| future::after(Duration::from_millis(latencies[i]), i),
    );
    let seen = collect_updates(&flattened);

    tx.update(0).unwrap();
    tx.update(1).unwrap();
    tx.update(2).unwrap();
    tx.succeed(());

    // Result 2 lands before result 1, so 1 is stale when it resolves; the
    // terminal completion still waits for every sub-future to settle.
    assert!(matches!(flattened.wait(), Ok(())));
    assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
    conflux::test_complete!("flatten_drop_out_of_order_discards_superseded_results");
}

#[test]
fn merge_then_concat_pipeline() {
    init_test("merge_then_concat_pipeline");

    let (tx_a, rx_a) = channel::<i32, i32>(Capacity::Unbounded);
    let (tx_b, rx_b) = channel::<i32, i32>(Capacity::Unbounded);
    let merged = merge(vec![rx_a, rx_b]);

    let (tx_tail, rx_tail) = channel::<i32, Vec<i32>>(Capacity::Unbounded);
    let chained = concat(vec![merged, rx_tail]);
    let seen = collect_updates(&chained);

    tx_a.update(1).unwrap();
    tx_b.update(2).unwrap();
    tx_a.succeed(10);
    tx_b.succeed(20);

    tx_tail.update(3).unwrap();
    tx_tail.succeed(vec![30]);

    assert_eq!(chained.wait().ok(), Some(vec![30]));
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    conflux::test_complete!("merge_then_concat_pipeline");
}

#[test]
fn suspendable_gates_a_live_feed() {
    init_test("suspendable_gates_a_live_feed");

    let (tx, rx) = channel::<i32, ()>(Capacity::Unbounded);
    let (gate_tx, gate_rx) = channel::<bool, ()>(Capacity::Bounded(0));
    let gated = suspendable(&rx, &gate_rx, false, 16);
    let seen = collect_updates(&gated);

    tx.update(1).unwrap();
    gate_tx.update(true).unwrap();
    tx.update(2).unwrap();
    tx.update(3).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1]);

    gate_tx.update(false).unwrap();
    tx.update(4).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    conflux::test_complete!("suspendable_gates_a_live_feed");
}

#[test]
fn failure_propagates_through_a_combinator_stack() {
    init_test("failure_propagates_through_a_combinator_stack");

    let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
    let (tx_b, rx_b) = channel::<i32, ()>(Capacity::Unbounded);
    let zipped = zip(&rx_a, &rx_b);
    let flattened = flat_map_future(
        &zipped,
        Executor::immediate(),
        FlatteningBehavior::KeepUnordered,
        |(a, b)| future::succeeded(a + b),
    );

    tx_a.update(1).unwrap();
    tx_b.update(2).unwrap();
    tx_a.fail(Error::message("upstream died"));

    assert!(matches!(flattened.wait(), Err(Error::Message(_))));
    conflux::test_complete!("failure_propagates_through_a_combinator_stack");
}
