//! Request coordination tests.
//!
//! Covers:
//! 1. Strict FIFO promotion of queued requests on release and on cancel of the head
//! 2. Immediately safe requests bypassing the queue
//! 3. Cancel, duplicate pending requests and failure handling
//! 4. Invariants holding under concurrent callers

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use resguard::core::{
    AllocError, Capacity, GrantTicket, ProcessStatus, ResourceManager, ResourceType,
    ResourceVector, WaitOutcome,
};

fn cpu(units: u64) -> ResourceVector {
    ResourceVector::of(ResourceType::Cpu, units)
}

fn queued(manager: &ResourceManager, pid: &str, units: u64) -> GrantTicket {
    manager
        .request(pid, cpu(units))
        .unwrap()
        .into_ticket()
        .unwrap_or_else(|| panic!("{pid} should have been queued"))
}

/// Twelve cpus; P0 holds 5, H holds 2, A holds 2, then A asks for 3 and B for 2,
/// both of which would leave nobody able to finish.
fn contended() -> (ResourceManager, GrantTicket, GrantTicket) {
    let manager = ResourceManager::new(Capacity::new(cpu(12), 1.0).unwrap());
    manager.register("P0", cpu(10)).unwrap();
    manager.register("H", cpu(4)).unwrap();
    manager.register("A", cpu(9)).unwrap();
    manager.register("B", cpu(9)).unwrap();
    for (pid, units) in [("P0", 5), ("H", 2), ("A", 2)] {
        assert!(manager.request(pid, cpu(units)).unwrap().is_granted());
    }

    let a = queued(&manager, "A", 3);
    let b = queued(&manager, "B", 2);
    assert_eq!(manager.waiting(), vec!["A", "B"]);
    (manager, a, b)
}

#[test]
fn test_release_promotes_in_fifo_order() {
    let (manager, a, b) = contended();

    let woken = manager.release("P0", cpu(3)).unwrap();
    assert_eq!(woken, vec!["A"]);

    assert_eq!(a.try_outcome(), Some(WaitOutcome::Granted));
    assert_eq!(b.try_outcome(), None);
    assert_eq!(manager.status("A"), Some(ProcessStatus::Running));
    assert_eq!(manager.status("B"), Some(ProcessStatus::Waiting));
    assert_eq!(manager.record("A").unwrap().allocation, cpu(5));
    assert_eq!(manager.waiting(), vec!["B"]);
    assert!(manager.snapshot().ledger.check_invariants().is_ok());
}

/// Ten cpus with H holding 6. Each of `pids` (claim 5) then asks for 3, which would
/// leave nobody able to finish, so every one of them is queued.
fn queued_behind_h(pids: &[&str]) -> (ResourceManager, Vec<GrantTicket>) {
    let manager = ResourceManager::new(Capacity::new(cpu(10), 1.0).unwrap());
    manager.register("H", cpu(10)).unwrap();
    for pid in ["A", "B"] {
        manager.register(pid, cpu(5)).unwrap();
    }
    assert!(manager.request("H", cpu(6)).unwrap().is_granted());
    let tickets = pids.iter().map(|pid| queued(&manager, pid, 3)).collect();
    (manager, tickets)
}

#[test]
fn test_follower_waits_when_head_leaves_too_little() {
    // Either request alone becomes grantable once H gives back 2.
    for pid in ["A", "B"] {
        let (manager, tickets) = queued_behind_h(&[pid]);
        assert_eq!(manager.release("H", cpu(2)).unwrap(), vec![pid]);
        assert_eq!(tickets[0].try_outcome(), Some(WaitOutcome::Granted));
    }

    let (manager, tickets) = queued_behind_h(&["A", "B"]);
    assert_eq!(manager.release("H", cpu(2)).unwrap(), vec!["A"]);
    assert_eq!(tickets[0].try_outcome(), Some(WaitOutcome::Granted));
    assert_eq!(tickets[1].try_outcome(), None);
    assert_eq!(manager.status("B"), Some(ProcessStatus::Waiting));
    assert_eq!(manager.waiting(), vec!["B"]);
}

/// Ten cpus with H holding 7. A (claim 10) asks for 3, then B (claim 4) asks for 3;
/// both are queued. After H returns one unit, B could finish on its own but A still
/// cannot be granted.
fn blocked_head() -> (ResourceManager, GrantTicket, GrantTicket) {
    let manager = ResourceManager::new(Capacity::new(cpu(10), 1.0).unwrap());
    manager.register("H", cpu(10)).unwrap();
    manager.register("A", cpu(10)).unwrap();
    manager.register("B", cpu(4)).unwrap();
    assert!(manager.request("H", cpu(7)).unwrap().is_granted());
    let a = queued(&manager, "A", 3);
    let b = queued(&manager, "B", 3);

    assert!(manager.release("H", cpu(1)).unwrap().is_empty());
    (manager, a, b)
}

#[test]
fn test_grantable_follower_stays_behind_blocked_head() {
    let (manager, a, b) = blocked_head();

    assert_eq!(a.try_outcome(), None);
    assert_eq!(b.try_outcome(), None);
    assert_eq!(manager.waiting(), vec!["A", "B"]);
    assert_eq!(manager.status("B"), Some(ProcessStatus::Waiting));
    assert!(manager.record("B").unwrap().allocation.is_zero());
}

#[test]
fn test_cancelling_head_promotes_follower() {
    let (manager, a, b) = blocked_head();

    assert!(manager.cancel("A").unwrap());
    assert_eq!(a.try_outcome(), Some(WaitOutcome::Cancelled));
    assert_eq!(b.try_outcome(), Some(WaitOutcome::Granted));
    assert_eq!(manager.status("B"), Some(ProcessStatus::Running));
    assert_eq!(manager.record("B").unwrap().allocation, cpu(3));
    assert!(manager.waiting().is_empty());
    assert!(manager.snapshot().ledger.check_invariants().is_ok());
}

#[test]
fn test_cancelling_follower_leaves_head_waiting() {
    let (manager, a, b) = blocked_head();

    assert!(manager.cancel("B").unwrap());
    assert_eq!(b.try_outcome(), Some(WaitOutcome::Cancelled));
    assert_eq!(a.try_outcome(), None);
    assert_eq!(manager.waiting(), vec!["A"]);
}

#[test]
fn test_safe_request_bypasses_queue() {
    let (manager, _a, _b) = contended();
    manager.release("P0", cpu(3)).unwrap();

    assert!(manager.request("H", cpu(2)).unwrap().is_granted());
    assert_eq!(manager.waiting(), vec!["B"]);
}

#[test]
fn test_second_request_while_queued_is_rejected() {
    let (manager, _a, _b) = contended();

    assert_eq!(
        manager.request("B", cpu(1)).unwrap_err(),
        AllocError::RequestPending("B".into())
    );
    assert_eq!(manager.waiting(), vec!["A", "B"]);
}

#[test]
fn test_cancel_withdraws_without_side_effects() {
    let (manager, a, b) = contended();
    let before = manager.snapshot().ledger;

    assert!(manager.cancel("A").unwrap());
    assert_eq!(a.wait(), WaitOutcome::Cancelled);
    assert_eq!(manager.status("A"), Some(ProcessStatus::Running));
    assert_eq!(manager.waiting(), vec!["B"]);
    assert_eq!(b.try_outcome(), None);

    let after = manager.snapshot().ledger;
    assert_eq!(after.available(), before.available());
    assert_eq!(after.get("A").unwrap().allocation, cpu(2));

    assert!(!manager.cancel("A").unwrap());
    assert_eq!(manager.cancel("ghost"), Err(AllocError::UnknownProcess("ghost".into())));
}

#[test]
fn test_failure_reclaims_and_promotes() {
    let (manager, a, b) = contended();

    let woken = manager.mark_failed("P0").unwrap();
    assert_eq!(woken, vec!["A", "B"]);
    assert_eq!(a.try_outcome(), Some(WaitOutcome::Granted));
    assert_eq!(b.try_outcome(), Some(WaitOutcome::Granted));

    let failed = manager.record("P0").unwrap();
    assert_eq!(failed.status, ProcessStatus::Error);
    assert!(failed.allocation.is_zero());
}

#[test]
fn test_failure_cancels_own_queued_request() {
    let (manager, a, b) = contended();

    assert!(manager.mark_failed("B").unwrap().is_empty());
    assert_eq!(b.wait_timeout(Duration::from_millis(100)), Some(WaitOutcome::Cancelled));
    assert_eq!(a.try_outcome(), None);
    assert_eq!(manager.status("B"), Some(ProcessStatus::Error));
    assert_eq!(manager.waiting(), vec!["A"]);
}

#[test]
fn test_deregister_and_reset_cancel_tickets() {
    let (manager, a, b) = contended();

    manager.deregister("B").unwrap();
    assert_eq!(b.try_outcome(), Some(WaitOutcome::Cancelled));
    assert_eq!(manager.waiting(), vec!["A"]);

    manager.reset(true);
    assert_eq!(a.try_outcome(), Some(WaitOutcome::Cancelled));
    assert_eq!(manager.status("A"), Some(ProcessStatus::Registered));
    assert!(manager.waiting().is_empty());
}

#[test]
fn test_waiting_request_granted_across_threads() {
    let (manager, a, _b) = contended();
    let manager = Arc::new(manager);

    let releaser = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            manager.release("P0", cpu(3)).unwrap()
        })
    };

    assert_eq!(a.wait(), WaitOutcome::Granted);
    assert_eq!(releaser.join().unwrap(), vec!["A"]);
}

#[test]
fn test_invariants_hold_under_concurrency() {
    let total = ResourceVector::new(40, 400, 400, 40);
    let manager = Arc::new(ResourceManager::new(Capacity::new(total, 0.9).unwrap()));
    let claim = ResourceVector::new(10, 100, 100, 10);

    let handles: Vec<_> = (0..8_u64)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let pid = format!("worker-{i}");
                let mut rng = StdRng::seed_from_u64(i);
                manager.register(pid.as_str(), claim).unwrap();

                for _ in 0..200 {
                    let held = manager.record(&pid).unwrap().allocation;
                    if rng.random_bool(0.6) {
                        let need = claim.saturating_sub(held);
                        let mut delta = ResourceVector::ZERO;
                        for (r, units) in need.iter() {
                            delta[r] = rng.random_range(0..=units.min(4));
                        }
                        match manager.request(&pid, delta) {
                            Ok(outcome) => {
                                if let Some(ticket) = outcome.into_ticket() {
                                    if ticket.wait_timeout(Duration::from_millis(2)).is_none() {
                                        manager.cancel(&pid).unwrap();
                                    }
                                }
                            }
                            Err(e) => assert!(e.is_deferrable(), "unexpected error {e}"),
                        }
                    } else {
                        let mut delta = ResourceVector::ZERO;
                        for (r, units) in held.iter() {
                            delta[r] = rng.random_range(0..=units);
                        }
                        manager.release(&pid, delta).unwrap();
                    }

                    let snapshot = manager.snapshot();
                    if let Err(problem) = snapshot.ledger.check_invariants() {
                        panic!("invariant broken: {problem}");
                    }
                }

                manager.deregister(&pid).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = manager.snapshot();
    assert!(snapshot.ledger.is_empty());
    assert!(snapshot.waiting.is_empty());
    assert_eq!(snapshot.ledger.available(), total);
}
