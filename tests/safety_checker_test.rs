//! Safety checker tests.
//!
//! Covers:
//! 1. The textbook five-process state and its deterministic safe sequence
//! 2. Requests that would leave the ledger unsafe are queued, not committed
//! 3. Any sequence the checker reports really lets every process finish

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use resguard::core::safety::{is_safe, safe_sequence};
use resguard::core::{
    Capacity, ProcessRecord, ProcessStatus, RequestOutcome, ResourceManager, ResourceVector,
};

fn record(pid: &str, max_claim: ResourceVector, allocation: ResourceVector) -> ProcessRecord {
    let mut record = ProcessRecord::new(pid.to_string(), max_claim, 0);
    record.allocation = allocation;
    record
}

fn v(cpu: u64, memory: u64, disk: u64) -> ResourceVector {
    ResourceVector::new(cpu, memory, disk, 0)
}

/// (pid, max claim, allocation) of the classic five-process example.
fn textbook() -> Vec<(&'static str, ResourceVector, ResourceVector)> {
    vec![
        ("P0", v(7, 5, 3), v(0, 1, 0)),
        ("P1", v(3, 2, 2), v(2, 0, 0)),
        ("P2", v(9, 0, 2), v(3, 0, 2)),
        ("P3", v(2, 2, 2), v(2, 1, 1)),
        ("P4", v(4, 3, 3), v(0, 0, 2)),
    ]
}

fn textbook_manager() -> ResourceManager {
    let manager = ResourceManager::new(Capacity::new(v(10, 5, 7), 1.0).unwrap());
    for (pid, max_claim, _) in textbook() {
        manager.register(pid, max_claim).unwrap();
    }
    for (pid, _, allocation) in textbook() {
        let outcome = manager.request(pid, allocation).unwrap();
        assert!(outcome.is_granted(), "{pid} should be granted");
    }
    manager
}

#[test]
fn test_textbook_state_yields_expected_sequence() {
    let records: Vec<_> = textbook()
        .into_iter()
        .map(|(pid, max, alloc)| record(pid, max, alloc))
        .collect();

    let sequence = safe_sequence(v(3, 3, 2), &records).unwrap();
    assert_eq!(sequence, vec!["P1", "P3", "P0", "P2", "P4"]);
    assert!(is_safe(v(3, 3, 2), &records));
}

#[test]
fn test_manager_reaches_textbook_state() {
    let manager = textbook_manager();
    let snapshot = manager.snapshot();

    assert_eq!(snapshot.ledger.available(), v(3, 3, 2));
    assert_eq!(
        snapshot.ledger.safe_sequence().unwrap(),
        vec!["P1", "P3", "P0", "P2", "P4"]
    );
    assert_eq!(manager.status("P1"), Some(ProcessStatus::Running));
    assert!(snapshot.ledger.check_invariants().is_ok());
}

#[test]
fn test_unsafe_request_is_queued_and_rolled_back() {
    let manager = textbook_manager();

    let outcome = manager.request("P4", v(3, 3, 0)).unwrap();
    let ticket = match outcome {
        RequestOutcome::Queued(ticket) => ticket,
        RequestOutcome::Granted => panic!("request leaves no process able to finish"),
    };

    assert_eq!(ticket.pid(), "P4");
    assert_eq!(ticket.try_outcome(), None);
    assert_eq!(manager.status("P4"), Some(ProcessStatus::Waiting));
    assert_eq!(manager.waiting(), vec!["P4"]);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.ledger.available(), v(3, 3, 2));
    assert_eq!(snapshot.ledger.get("P4").unwrap().allocation, v(0, 0, 2));
}

#[test]
fn test_no_finishable_process_is_unsafe() {
    let records = vec![
        record("p0", v(10, 0, 0), v(5, 0, 0)),
        record("p1", v(4, 0, 0), v(2, 0, 0)),
        record("p2", v(9, 0, 0), v(3, 0, 0)),
    ];
    assert!(!is_safe(v(2, 0, 0), &records));
    assert_eq!(safe_sequence(v(2, 0, 0), &records), None);
}

#[test]
fn test_reported_sequences_are_sound() {
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..500 {
        let count = rng.random_range(1..=6);
        let records: Vec<_> = (0..count)
            .map(|i| {
                let max = v(
                    rng.random_range(0..=8),
                    rng.random_range(0..=8),
                    rng.random_range(0..=8),
                );
                let alloc = v(
                    rng.random_range(0..=max.cpu),
                    rng.random_range(0..=max.memory),
                    rng.random_range(0..=max.disk),
                );
                record(&format!("p{i}"), max, alloc)
            })
            .collect();
        let available = v(
            rng.random_range(0..=6),
            rng.random_range(0..=6),
            rng.random_range(0..=6),
        );

        let sequence = safe_sequence(available, &records);
        assert_eq!(sequence.is_some(), is_safe(available, &records));

        if let Some(sequence) = sequence {
            assert_eq!(sequence.len(), records.len());
            let mut work = available;
            for pid in &sequence {
                let r = records.iter().find(|r| &r.pid == pid).unwrap();
                assert!(r.need().fits_within(work), "{pid} cannot finish");
                work += r.allocation;
            }
        }
    }
}
