//! Integration tests for the persistent round-robin queue

use onion_crawler::{Dequeued, RoundRobinQueue};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn drain(queue: &RoundRobinQueue) -> Vec<String> {
    let mut urls = Vec::new();
    while let Some(url) = queue.try_dequeue().unwrap() {
        urls.push(url);
    }
    urls
}

#[test]
fn test_restore_resumes_exact_order() {
    let dir = tempdir().unwrap();
    let urls = [
        "http://a.onion/1",
        "http://a.onion/2",
        "http://a.onion/3",
        "http://b.onion/1",
        "http://c.onion/1",
        "http://c.onion/2",
    ];

    // Reference run without a restart
    let reference = {
        let queue = RoundRobinQueue::create(dir.path().join("reference")).unwrap();
        queue.enqueue_all(urls).unwrap();
        let order = drain(&queue);
        queue.close().unwrap();
        order
    };

    let folder = dir.path().join("restarted");
    let queue = RoundRobinQueue::create(&folder).unwrap();
    queue.enqueue_all(urls).unwrap();
    let mut order = vec![
        queue.try_dequeue().unwrap().unwrap(),
        queue.try_dequeue().unwrap().unwrap(),
    ];
    queue.close().unwrap();

    let queue = RoundRobinQueue::restore(&folder).unwrap();
    assert_eq!(queue.len(), urls.len() - 2);
    assert_eq!(queue.domains_discovered(), 3);
    order.extend(drain(&queue));
    queue.close().unwrap();

    assert_eq!(order, reference);
}

#[test]
fn test_restore_without_close_keeps_every_url() {
    let dir = tempdir().unwrap();

    {
        let queue = RoundRobinQueue::create(dir.path()).unwrap();
        queue.enqueue("http://a.onion/1").unwrap();
        queue.enqueue("http://b.onion/1").unwrap();
        queue.enqueue("http://a.onion/2").unwrap();
        assert_eq!(queue.try_dequeue().unwrap().as_deref(), Some("http://a.onion/1"));
        // Dropped without close, as after a kill
    }

    let queue = RoundRobinQueue::restore(dir.path()).unwrap();
    assert_eq!(drain(&queue), vec!["http://b.onion/1", "http://a.onion/2"]);
}

#[test]
fn test_restore_missing_folder_fails() {
    let dir = tempdir().unwrap();
    assert!(RoundRobinQueue::restore(dir.path().join("absent")).is_err());
}

#[test]
fn test_concurrent_producers_and_consumers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 200;

    let dir = tempdir().unwrap();
    let queue = Arc::new(RoundRobinQueue::create(dir.path()).unwrap());

    let taken = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let taken = Arc::clone(&taken);
            thread::spawn(move || {
                let mut received = Vec::new();
                while taken.load(Ordering::SeqCst) < PRODUCERS * PER_PRODUCER {
                    match queue.timed_dequeue(Duration::from_millis(50)).unwrap() {
                        Dequeued::Item(url) => {
                            taken.fetch_add(1, Ordering::SeqCst);
                            received.push(url);
                        }
                        Dequeued::TimedOut => continue,
                        Dequeued::Cancelled => break,
                    }
                }
                received
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue
                        .enqueue(&format!("http://d{}.onion/p{}/{}", i % 5, p, i))
                        .unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let mut per_consumer = Vec::new();
    for consumer in consumers {
        per_consumer.push(consumer.join().unwrap());
    }

    let all: Vec<String> = per_consumer.iter().flatten().cloned().collect();
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(unique.len(), all.len());
    assert!(queue.is_empty());

    // Each consumer sees a domain's URLs from one producer in insertion order
    for received in &per_consumer {
        let mut last: HashMap<(String, String), usize> = HashMap::new();
        for url in received {
            let parts: Vec<&str> = url.trim_start_matches("http://").split('/').collect();
            let key = (parts[0].to_string(), parts[1].to_string());
            let index: usize = parts[2].parse().unwrap();
            if let Some(previous) = last.insert(key, index) {
                assert!(previous < index, "{} out of order", url);
            }
        }
    }

    queue.close().unwrap();
}

#[test]
fn test_blocking_consumers_drain_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 150;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let dir = tempdir().unwrap();
    let queue = Arc::new(RoundRobinQueue::create(dir.path()).unwrap());
    let taken = Arc::new(AtomicUsize::new(0));

    // Started first, so every consumer parks before anything is queued
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let taken = Arc::clone(&taken);
            thread::spawn(move || {
                let mut received = Vec::new();
                loop {
                    match queue.blocking_dequeue().unwrap() {
                        Dequeued::Item(url) => {
                            taken.fetch_add(1, Ordering::SeqCst);
                            received.push(url);
                        }
                        Dequeued::TimedOut => continue,
                        Dequeued::Cancelled => break,
                    }
                }
                received
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(50));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue
                        .enqueue(&format!("http://d{}.onion/p{}/{}", i % 7, p, i))
                        .unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while taken.load(Ordering::SeqCst) < TOTAL {
        assert!(Instant::now() < deadline, "consumers stalled");
        thread::sleep(Duration::from_millis(10));
    }
    queue.shutdown();

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.join().unwrap());
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), TOTAL);
    assert_eq!(unique.len(), TOTAL);
    assert!(queue.is_empty());

    queue.close().unwrap();
}

#[test]
fn test_shutdown_releases_blocked_consumers() {
    let dir = tempdir().unwrap();
    let queue = Arc::new(RoundRobinQueue::create(dir.path()).unwrap());

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.blocking_dequeue().unwrap())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    queue.shutdown();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Dequeued::Cancelled);
    }

    // Non-blocking operations still work until close
    queue.enqueue("http://a.onion/").unwrap();
    assert_eq!(queue.len(), 1);
    queue.close().unwrap();
}
