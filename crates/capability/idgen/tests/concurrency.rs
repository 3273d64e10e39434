use aq_idgen::{SnowflakeGenerator, decompose};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_callers_never_collide() {
    const THREADS: usize = 8;
    const CALLS: usize = 20_000;

    let generator = Arc::new(SnowflakeGenerator::new(42).expect("generator"));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let generator = generator.clone();
            thread::spawn(move || {
                let mut ids = Vec::with_capacity(CALLS);
                for _ in 0..CALLS {
                    ids.push(generator.next_id().expect("id"));
                }
                ids
            })
        })
        .collect();

    let mut seen = HashSet::with_capacity(THREADS * CALLS);
    for handle in handles {
        let ids = handle.join().expect("thread");
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        for id in ids {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), THREADS * CALLS);
}

#[test]
fn distinct_instances_do_not_collide() {
    let left = Arc::new(SnowflakeGenerator::new(1).expect("left"));
    let right = Arc::new(SnowflakeGenerator::new(2).expect("right"));

    let spawn = |generator: Arc<SnowflakeGenerator>| {
        thread::spawn(move || {
            (0..5_000)
                .map(|_| generator.next_id().expect("id"))
                .collect::<Vec<_>>()
        })
    };
    let a = spawn(left).join().expect("left thread");
    let b = spawn(right).join().expect("right thread");

    let mut seen: HashSet<u64> = a.iter().copied().collect();
    for id in &b {
        assert!(seen.insert(*id));
    }
    assert!(a.iter().all(|id| decompose(*id, 0).instance == 1));
    assert!(b.iter().all(|id| decompose(*id, 0).instance == 2));
}
