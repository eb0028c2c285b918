//! Cross-component concurrency tests
//!
//! These tests exercise the engine's blocking, fairness and atomicity
//! guarantees through the public API, both with real OS threads and by
//! driving suspended transactions deterministically through the
//! `attempt`/`ResumeToken` step interface the way a cooperative
//! scheduler would.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use txcell::{
    atomically, atomically_or_interrupt, attempt, Attempt, InterruptToken, LockOwner, StmError,
    TCell, THub, TQueue, TRwLock, TWatch,
};

fn suspended<T>(outcome: Attempt<T>) -> txcell::ResumeToken {
    match outcome {
        Attempt::Suspended(token) => token,
        Attempt::Completed(_) => panic!("expected the transaction to suspend"),
    }
}

fn completed<T>(outcome: Attempt<T>) -> T {
    match outcome {
        Attempt::Completed(result) => result.expect("transaction failed"),
        Attempt::Suspended(_) => panic!("expected the transaction to complete"),
    }
}

// ============================================================================
// Atomicity and isolation
// ============================================================================

#[test]
fn concurrent_observers_never_see_partial_commits() {
    let x = TCell::new(0u64);
    let y = TCell::new(0u64);

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let x = x.clone();
            let y = y.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    atomically(|| {
                        let a = x.read_tx()?;
                        let b = y.read_tx()?;
                        x.write_tx(a + 1)?;
                        y.write_tx(b + 1)
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    let observers: Vec<_> = (0..2)
        .map(|_| {
            let x = x.clone();
            let y = y.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let (a, b) = atomically(|| Ok((x.read_tx()?, y.read_tx()?))).unwrap();
                    assert_eq!(a, b, "observed a partially applied commit");
                }
            })
        })
        .collect();

    for t in writers.into_iter().chain(observers) {
        t.join().unwrap();
    }
    assert_eq!(x.read_now(), 800);
    assert_eq!(y.read_now(), 800);
}

#[test]
fn queue_transfers_every_item_exactly_once() {
    let queue = TQueue::bounded(8);

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 1..=100u64 {
                atomically(|| queue.offer(i)).unwrap();
            }
            atomically(|| queue.shutdown()).unwrap();
        })
    };

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let mut sum = 0u64;
            loop {
                match atomically(|| queue.take()) {
                    Ok(item) => sum += item,
                    Err(StmError::Closed) => return sum,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
        })
    };

    producer.join().unwrap();
    assert_eq!(consumer.join().unwrap(), 5050);
}

// ============================================================================
// Blocking, wake order and fairness
// ============================================================================

#[test]
fn blocked_takers_resolve_in_fifo_order() {
    let queue: TQueue<i32> = TQueue::bounded(4);
    let first_take = {
        let queue = queue.clone();
        move || queue.take()
    };
    let second_take = {
        let queue = queue.clone();
        move || queue.take()
    };

    // Two takers block on the empty queue, in order.
    let first_token = suspended(attempt(None, &first_take));
    let second_token = suspended(attempt(None, &second_take));

    let wake_order: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));
    for (token, label) in [(&first_token, "first"), (&second_token, "second")] {
        let wake_order = Arc::clone(&wake_order);
        assert!(token.on_wake(move || wake_order.lock().unwrap().push(label)));
    }

    // One offer wakes both waiters, earliest-blocked first.
    atomically(|| queue.offer(1)).unwrap();
    assert_eq!(*wake_order.lock().unwrap(), ["first", "second"]);

    // A cooperative scheduler resumes in wake order: the first taker
    // wins the item, the second blocks again and gets the next one.
    assert_eq!(completed(attempt(None, &first_take)), 1);
    let second_again = suspended(attempt(None, &second_take));
    atomically(|| queue.offer(2)).unwrap();
    assert!(!second_again.is_pending());
    assert_eq!(completed(attempt(None, &second_take)), 2);
}

#[test]
fn write_lock_hands_off_in_blocking_order() {
    let lock = TRwLock::new();
    let first = LockOwner::fresh();
    let second = LockOwner::fresh();
    let third = LockOwner::fresh();

    atomically(|| lock.acquire_write(first)).unwrap();

    let second_acquire = {
        let lock = lock.clone();
        move || lock.acquire_write(second)
    };
    let third_acquire = {
        let lock = lock.clone();
        move || lock.acquire_write(third)
    };

    let second_token = suspended(attempt(None, &second_acquire));
    let third_token = suspended(attempt(None, &third_acquire));

    let wake_order: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));
    for (token, label) in [(&second_token, "second"), (&third_token, "third")] {
        let wake_order = Arc::clone(&wake_order);
        assert!(token.on_wake(move || wake_order.lock().unwrap().push(label)));
    }

    atomically(|| lock.release_write(first)).unwrap();
    assert_eq!(*wake_order.lock().unwrap(), ["second", "third"]);

    // Resumed in wake order: the earliest-blocked writer acquires, the
    // later one blocks again until the next release.
    completed(attempt(None, &second_acquire));
    let third_again = suspended(attempt(None, &third_acquire));

    atomically(|| lock.release_write(second)).unwrap();
    assert!(!third_again.is_pending());
    completed(attempt(None, &third_acquire));
    atomically(|| lock.release_write(third)).unwrap();
    assert_eq!(atomically(|| lock.write_locked()), Ok(false));
}

#[test]
fn publisher_blocked_by_slow_subscriber_resumes_on_take() {
    let hub = THub::bounded(1);
    let subscription = hub.subscribe().unwrap();

    let publisher = {
        let hub = hub.clone();
        thread::spawn(move || {
            for i in 1..=3 {
                // Blocks whenever the subscriber's queue is full.
                assert_eq!(atomically(|| hub.publish(i)), Ok(true));
            }
        })
    };

    let mut received = Vec::new();
    for _ in 0..3 {
        thread::sleep(Duration::from_millis(20));
        received.push(atomically(|| subscription.take()).unwrap());
    }
    publisher.join().unwrap();
    assert_eq!(received, vec![1, 2, 3]);
}

// ============================================================================
// Interruption
// ============================================================================

#[test]
fn interrupting_a_parked_taker_unwinds_it() {
    let queue: TQueue<i32> = TQueue::unbounded();
    let token = InterruptToken::new();

    let taker = {
        let queue = queue.clone();
        let token = token.clone();
        thread::spawn(move || atomically_or_interrupt(&token, || queue.take()))
    };

    thread::sleep(Duration::from_millis(50));
    token.interrupt();
    assert_eq!(taker.join().unwrap(), Err(StmError::Interrupted));

    // The queue is untouched and still usable.
    atomically(|| queue.offer(1)).unwrap();
    assert_eq!(atomically(|| queue.take()), Ok(1));
}

// ============================================================================
// Observable cells end to end
// ============================================================================

#[test]
fn watch_subscribers_see_the_full_committed_sequence() {
    let watch = TWatch::new(0);
    let mut changes = watch.changes().unwrap();

    let collector = thread::spawn(move || {
        let mut seen = Vec::new();
        loop {
            let value = changes.next().unwrap();
            seen.push(value);
            if value == 5 {
                return seen;
            }
        }
    });

    for i in 1..=5 {
        atomically(|| watch.set(i)).unwrap();
    }
    assert_eq!(collector.join().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}
