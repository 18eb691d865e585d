//! Loom-based concurrency tests for buffer lock exclusivity.

#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;
use safer_rawcap::{Buffer, Packet, RawcapError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Two threads competing for the access guard never both hold it
#[test]
fn test_buffer_access_exclusive() {
    loom::model(|| {
        let buffer = Buffer::new(64, 4).unwrap();
        let holders = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let buffer = buffer.clone();
            let holders = Arc::clone(&holders);
            let overlaps = Arc::clone(&overlaps);

            handles.push(thread::spawn(move || match buffer.access() {
                Ok(_guard) => {
                    if holders.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                    holders.fetch_sub(1, Ordering::SeqCst);
                }
                Err(error) => assert!(matches!(error, RawcapError::InUse)),
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    });
}

/// Concurrent inserts never exceed capacity
#[test]
fn test_concurrent_push_respects_capacity() {
    loom::model(|| {
        let buffer = Buffer::new(64, 1).unwrap();
        let stored = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let buffer = buffer.clone();
            let stored = Arc::clone(&stored);
            handles.push(thread::spawn(move || {
                let packet = Packet::new(64).unwrap();
                if let Ok(true) = buffer.push_back(&packet) {
                    stored.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(stored.load(Ordering::SeqCst) <= 1);
        assert!(buffer.count().unwrap_or(0) <= 1);
    });
}
