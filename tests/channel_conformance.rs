//! Conformance tests for the multi-update stream core.

mod common;

use common::{collect_updates, init_test};
use conflux::{Capacity, Error, Event, Executor, channel, time};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn fan_out_delivers_to_every_subscriber() {
    init_test("fan_out_delivers_to_every_subscriber");

    let (tx, rx) = channel::<i32, ()>(Capacity::Bounded(4));
    let first = collect_updates(&rx);
    let second = collect_updates(&rx);

    for i in 0..3 {
        tx.update(i).unwrap();
    }

    assert_eq!(*first.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*second.lock().unwrap(), vec![0, 1, 2]);
    conflux::test_complete!("fan_out_delivers_to_every_subscriber");
}

#[test]
fn replay_depth_matches_capacity() {
    init_test("replay_depth_matches_capacity");

    let (tx, rx) = channel::<i32, ()>(Capacity::Bounded(3));
    for i in 0..10 {
        tx.update(i).unwrap();
    }

    let late = collect_updates(&rx);
    assert_eq!(*late.lock().unwrap(), vec![7, 8, 9]);
    conflux::test_complete!("replay_depth_matches_capacity");
}

#[test]
fn capacity_zero_is_fire_and_forget() {
    init_test("capacity_zero_is_fire_and_forget");

    let (tx, rx) = channel::<i32, ()>(Capacity::Bounded(0));
    tx.update(1).unwrap();

    let seen = collect_updates(&rx);
    tx.update(2).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![2]);
    conflux::test_complete!("capacity_zero_is_fire_and_forget");
}

#[test]
fn iterator_streams_across_threads_and_ends_at_completion() {
    init_test("iterator_streams_across_threads_and_ends_at_completion");

    let (tx, rx) = channel::<u32, &'static str>(Capacity::Bounded(64));
    let consumer = {
        let rx = rx.clone();
        std::thread::spawn(move || {
            let mut iter = rx.iter();
            let values: Vec<u32> = iter.by_ref().collect();
            (values, iter.missed(), iter.completion())
        })
    };

    for i in 0..32 {
        tx.update(i).unwrap();
        if i % 8 == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    tx.succeed("done");

    let (values, missed, completion) = consumer.join().expect("consumer panicked");
    assert_eq!(values, (0..32).collect::<Vec<_>>());
    assert_eq!(missed, 0);
    assert_eq!(completion.and_then(Result::ok), Some("done"));
    conflux::test_complete!("iterator_streams_across_threads_and_ends_at_completion");
}

#[test]
fn slow_iterator_reports_lag() {
    init_test("slow_iterator_reports_lag");

    let (tx, rx) = channel::<u32, ()>(Capacity::Bounded(4));
    let mut iter = rx.iter();

    for i in 0..12 {
        tx.update(i).unwrap();
    }
    tx.succeed(());

    let values: Vec<u32> = iter.by_ref().collect();
    assert_eq!(values, vec![8, 9, 10, 11]);
    conflux::assert_with_log!(iter.missed() == 8, "missed count", 8u64, iter.missed());
    conflux::test_complete!("slow_iterator_reports_lag");
}

#[test]
fn concurrent_producers_are_counted_not_lost() {
    init_test("concurrent_producers_are_counted_not_lost");

    let (tx, rx) = channel::<usize, ()>(Capacity::Unbounded);
    let received = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&received);
    let _sub = rx.on_update(Executor::immediate(), move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    let mut producers = Vec::new();
    for _ in 0..4 {
        let tx = tx.clone();
        producers.push(std::thread::spawn(move || {
            for i in 0..100 {
                tx.update(i).unwrap();
            }
        }));
    }
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    assert_eq!(received.load(Ordering::SeqCst), 400);
    conflux::test_complete!("concurrent_producers_are_counted_not_lost");
}

#[test]
fn per_producer_order_is_preserved() {
    init_test("per_producer_order_is_preserved");

    let (tx, rx) = channel::<(usize, usize), ()>(Capacity::Unbounded);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = rx.on_update(Executor::immediate(), move |pair| {
        sink.lock().unwrap().push(pair);
    });

    let mut producers = Vec::new();
    for producer_id in 0..3 {
        let tx = tx.clone();
        producers.push(std::thread::spawn(move || {
            for seq in 0..50 {
                tx.update((producer_id, seq)).unwrap();
            }
        }));
    }
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    let seen = seen.lock().unwrap();
    for producer_id in 0..3 {
        let sequence: Vec<usize> = seen
            .iter()
            .filter(|(p, _)| *p == producer_id)
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(sequence, (0..50).collect::<Vec<_>>());
    }
    conflux::test_complete!("per_producer_order_is_preserved");
}

#[test]
fn completion_event_reaches_combined_handler_after_replay() {
    init_test("completion_event_reaches_combined_handler_after_replay");

    let (tx, rx) = channel::<i32, i32>(Capacity::Bounded(8));
    tx.update(1).unwrap();
    tx.succeed(99);

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _sub = rx.make_handler(Executor::immediate(), move |event| {
        let entry = match event {
            Event::Update(v) => format!("update:{v}"),
            Event::Completion(Ok(s)) => format!("success:{s}"),
            Event::Completion(Err(e)) => format!("failure:{e}"),
        };
        sink.lock().unwrap().push(entry);
    });

    assert_eq!(*log.lock().unwrap(), vec!["update:1", "success:99"]);
    conflux::test_complete!("completion_event_reaches_combined_handler_after_replay");
}

#[test]
fn abandoned_producer_is_not_a_hang() {
    init_test("abandoned_producer_is_not_a_hang");

    let (tx, rx) = channel::<i32, ()>(Capacity::DEFAULT);
    let consumer = {
        let rx = rx.clone();
        std::thread::spawn(move || rx.iter().collect::<Vec<_>>())
    };

    std::thread::sleep(Duration::from_millis(20));
    drop(tx);

    assert!(consumer.join().expect("consumer panicked").is_empty());
    assert!(matches!(rx.completion(), Some(Err(Error::Abandoned))));
    conflux::test_complete!("abandoned_producer_is_not_a_hang");
}

#[test]
fn interval_channel_ticks_until_unobserved() {
    init_test("interval_channel_ticks_until_unobserved");

    let ticks = time::interval(Duration::from_millis(10));
    let (sender, receiver) = std::sync::mpsc::channel();
    let _sub = ticks.on_update(Executor::immediate(), move |tick| {
        let _ = sender.send(tick);
    });

    let first = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((first, second), (0, 1));
    conflux::test_complete!("interval_channel_ticks_until_unobserved");
}
