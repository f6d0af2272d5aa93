// Copyright (c) 2024 Botho Foundation

//! Session key manager under concurrent senders and receivers.

use allium::{ManualClock, RouterMetrics, SessionKeyConfig, TransientSessionKeyManager};
use alm_data::{PrivateKey, SessionKey, SessionTag};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

const NOW: u64 = 1_700_000_000_000;
const THREADS: usize = 8;

fn manager() -> Arc<TransientSessionKeyManager> {
    Arc::new(TransientSessionKeyManager::new(
        SessionKeyConfig::default(),
        Arc::new(ManualClock::new(NOW)),
        Arc::new(RouterMetrics::new()),
    ))
}

#[test]
fn test_concurrent_get_or_create_agrees_on_one_key() {
    let skm = manager();
    let target = PrivateKey::random(&mut ChaCha20Rng::seed_from_u64(1)).public_key();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let skm = skm.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                skm.get_current_or_new_key(&target).as_bytes().to_vec()
            })
        })
        .collect();
    let keys: HashSet<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(keys.len(), 1);
    assert_eq!(skm.outbound_session_count(), 1);
}

#[test]
fn test_each_inbound_tag_is_consumed_once() {
    let skm = manager();
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let key = SessionKey::random(&mut rng);
    let tags: Vec<SessionTag> = (0..400).map(|_| SessionTag::random(&mut rng)).collect();
    skm.tags_received(&key, tags.clone(), Duration::from_secs(600));
    let tags = Arc::new(tags);

    // every thread tries every tag; exactly one wins each
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let skm = skm.clone();
            let tags = tags.clone();
            thread::spawn(move || tags.iter().filter(|tag| skm.consume_tag(tag).is_some()).count())
        })
        .collect();
    let consumed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(consumed, 400);
    assert_eq!(skm.inbound_tag_count(), 0);
}

#[test]
fn test_outbound_tags_spent_once_while_acks_land() {
    const SETS: usize = 20;
    const TAGS_PER_SET: usize = 25;
    const ACKERS: usize = 2;

    let skm = manager();
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let target = PrivateKey::random(&mut rng).public_key();
    let key = skm.get_current_or_new_key(&target);

    // nothing acked yet, so every set waits in the unacked list
    let mut delivered = HashSet::new();
    let mut handles = Vec::new();
    for _ in 0..SETS {
        let tags: Vec<SessionTag> = (0..TAGS_PER_SET).map(|_| SessionTag::random(&mut rng)).collect();
        delivered.extend(tags.iter().copied());
        handles.push(skm.tags_delivered(&target, &key, tags));
    }
    assert!(skm.consume_next_available_tag(&target, &key).is_none());

    let handles = Arc::new(handles);
    let acked = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let ackers: Vec<_> = (0..ACKERS)
        .map(|i| {
            let (skm, handles, acked, barrier) = (skm.clone(), handles.clone(), acked.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                for handle in handles.iter().skip(i).step_by(ACKERS) {
                    skm.tags_acked(handle);
                    acked.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    let spenders: Vec<_> = (ACKERS..THREADS)
        .map(|_| {
            let (skm, acked, barrier) = (skm.clone(), acked.clone(), barrier.clone());
            let key = key.duplicate();
            thread::spawn(move || {
                barrier.wait();
                let mut spent = Vec::new();
                loop {
                    // read before spending: an empty pool after every ack means done
                    let all_acked = acked.load(Ordering::SeqCst) == SETS;
                    match skm.consume_next_available_tag(&target, &key) {
                        Some(tag) => spent.push(tag),
                        None if all_acked => return spent,
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    for acker in ackers {
        acker.join().unwrap();
    }
    let spent: Vec<SessionTag> = spenders.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let unique: HashSet<SessionTag> = spent.iter().copied().collect();

    assert_eq!(spent.len(), SETS * TAGS_PER_SET);
    assert_eq!(unique, delivered);
    assert_eq!(skm.snapshot().outbound_tags, 0);
}

#[test]
fn test_sessions_with_different_peers_are_independent() {
    let skm = manager();
    let barrier = Arc::new(Barrier::new(THREADS));

    // each thread runs a full deliver/ack/spend cycle with its own peer
    let handles: Vec<_> = (0..THREADS as u64)
        .map(|i| {
            let skm = skm.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut rng = ChaCha20Rng::seed_from_u64(100 + i);
                let target = PrivateKey::random(&mut rng).public_key();
                let key = skm.get_current_or_new_key(&target);
                let tags: Vec<SessionTag> = (0..20).map(|_| SessionTag::random(&mut rng)).collect();
                barrier.wait();
                let handle = skm.tags_delivered(&target, &key, tags.clone());
                assert!(skm.consume_next_available_tag(&target, &key).is_none());
                skm.tags_acked(&handle);
                let spent: HashSet<SessionTag> = (0..20)
                    .filter_map(|_| skm.consume_next_available_tag(&target, &key))
                    .collect();
                assert_eq!(spent, tags.into_iter().collect());
                assert!(skm.consume_next_available_tag(&target, &key).is_none());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = skm.snapshot();
    assert_eq!(stats.outbound_sessions, THREADS);
    assert_eq!(stats.outbound_tags, 0);
}
