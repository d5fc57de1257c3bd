//! Wait queue for requests that could not be granted safely, and the grant tickets
//! their owners hold.
//!
//! The queue is global rather than per resource, since one request can span several
//! resource types. Re-evaluation is strict FIFO: scanning stops at the first head
//! that still cannot be granted, so the longest-waiting request is never overtaken
//! by a later queued one.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::core::error::AllocError;
use crate::core::ledger::{Ledger, ProcessId, ProcessStatus};
use crate::core::resource::ResourceVector;

/// Final outcome delivered to a queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The request was granted and committed.
    Granted,
    /// The request was withdrawn by cancel, deregister, failure or reset.
    Cancelled,
    /// The request can never be granted.
    Rejected(AllocError),
}

/// Result of a `request` call. Queued is a successful-but-deferred outcome.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Units were committed immediately.
    Granted,
    /// The request is parked; the ticket resolves once it is granted or withdrawn.
    Queued(GrantTicket),
}

impl RequestOutcome {
    /// True for an immediate grant.
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// The ticket of a queued request.
    pub fn into_ticket(self) -> Option<GrantTicket> {
        match self {
            Self::Granted => None,
            Self::Queued(ticket) => Some(ticket),
        }
    }
}

/// Handle for a queued request. Receives exactly one [`WaitOutcome`].
#[derive(Debug)]
pub struct GrantTicket {
    pid: ProcessId,
    delta: ResourceVector,
    receiver: Receiver<WaitOutcome>,
}

impl GrantTicket {
    /// Owner of the request.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Units requested.
    pub const fn delta(&self) -> ResourceVector {
        self.delta
    }

    /// Non-blocking poll.
    pub fn try_outcome(&self) -> Option<WaitOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(WaitOutcome::Cancelled),
        }
    }

    /// Waits up to `timeout`; `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WaitOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(WaitOutcome::Cancelled),
        }
    }

    /// Blocks the calling thread until the request resolves.
    pub fn wait(self) -> WaitOutcome {
        self.receiver.recv().unwrap_or(WaitOutcome::Cancelled)
    }

    /// Underlying channel, for `select!`-style integration.
    pub const fn receiver(&self) -> &Receiver<WaitOutcome> {
        &self.receiver
    }
}

/// Public view of a queued request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingRequest {
    /// Owner of the request.
    pub pid: ProcessId,
    /// Units requested.
    pub delta: ResourceVector,
    /// Enqueue time, milliseconds since epoch.
    pub enqueued_at_ms: u128,
}

pub(crate) struct PendingRequest {
    pid: ProcessId,
    delta: ResourceVector,
    enqueued_at_ms: u128,
    notifier: Sender<WaitOutcome>,
}

impl PendingRequest {
    /// Delivers the outcome. Capacity is one and only one send ever happens, so this
    /// never blocks; a dropped ticket is ignored.
    pub(crate) fn notify(&self, outcome: WaitOutcome) {
        let _ = self.notifier.try_send(outcome);
    }

    #[cfg(test)]
    pub(crate) fn pid(&self) -> &str {
        &self.pid
    }

    pub(crate) const fn delta(&self) -> ResourceVector {
        self.delta
    }
}

/// FIFO of pending requests, at most one per process.
#[derive(Default)]
pub(crate) struct WaitQueue {
    entries: VecDeque<PendingRequest>,
}

impl WaitQueue {
    pub(crate) fn push(&mut self, pid: &str, delta: ResourceVector, now_ms: u128) -> GrantTicket {
        let (notifier, receiver) = bounded(1);
        self.entries.push_back(PendingRequest {
            pid: pid.to_string(),
            delta,
            enqueued_at_ms: now_ms,
            notifier,
        });
        GrantTicket {
            pid: pid.to_string(),
            delta,
            receiver,
        }
    }

    pub(crate) fn is_head(&self, pid: &str) -> bool {
        self.entries.front().is_some_and(|e| e.pid == pid)
    }

    pub(crate) fn contains(&self, pid: &str) -> bool {
        self.entries.iter().any(|e| e.pid == pid)
    }

    pub(crate) fn remove(&mut self, pid: &str) -> Option<PendingRequest> {
        let idx = self.entries.iter().position(|e| e.pid == pid)?;
        self.entries.remove(idx)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.entries.drain(..)
    }

    pub(crate) fn view(&self) -> Vec<WaitingRequest> {
        self.entries
            .iter()
            .map(|e| WaitingRequest {
                pid: e.pid.clone(),
                delta: e.delta,
                enqueued_at_ms: e.enqueued_at_ms,
            })
            .collect()
    }
}

/// What happened to a queue head during re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Promotion {
    pub pid: ProcessId,
    pub delta: ResourceVector,
    pub rejected: Option<AllocError>,
}

/// Re-attempts queued requests from the head, committing each one that is now
/// grantable and stopping at the first that is not.
///
/// Heads failing with a non-deferrable error are dropped and their owners marked
/// [`ProcessStatus::Error`]. Must be called with the ledger lock held.
pub(crate) fn promote_waiting(
    ledger: &mut Ledger,
    queue: &mut WaitQueue,
    now_ms: u128,
) -> Vec<Promotion> {
    let mut promoted = Vec::new();
    while let Some(head) = queue.entries.front() {
        match ledger.try_grant(&head.pid, head.delta) {
            Ok(true) => {
                ledger.set_status(&head.pid, ProcessStatus::Running, now_ms);
                head.notify(WaitOutcome::Granted);
                promoted.push(Promotion {
                    pid: head.pid.clone(),
                    delta: head.delta,
                    rejected: None,
                });
            }
            Ok(false) => {
                tracing::debug!(pid = %head.pid, "queue head still unsafe");
                break;
            }
            Err(e) if e.is_deferrable() => {
                tracing::debug!(pid = %head.pid, reason = %e, "queue head deferred");
                break;
            }
            Err(e) => {
                ledger.set_status(&head.pid, ProcessStatus::Error, now_ms);
                head.notify(WaitOutcome::Rejected(e.clone()));
                promoted.push(Promotion {
                    pid: head.pid.clone(),
                    delta: head.delta,
                    rejected: Some(e),
                });
            }
        }
        queue.entries.pop_front();
    }
    promoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::{Capacity, ProcessRecord};
    use crate::core::resource::ResourceType;

    fn cpu(units: u64) -> ResourceVector {
        ResourceVector::of(ResourceType::Cpu, units)
    }

    #[test]
    fn test_queue_is_fifo_and_removable() {
        let mut queue = WaitQueue::default();
        let _a = queue.push("a", cpu(1), 1);
        let _b = queue.push("b", cpu(2), 2);
        let _c = queue.push("c", cpu(3), 3);
        assert!(queue.contains("b"));

        let removed = queue.remove("b").unwrap();
        assert_eq!(removed.pid(), "b");
        assert_eq!(removed.delta(), cpu(2));
        let pids: Vec<_> = queue.view().into_iter().map(|w| w.pid).collect();
        assert_eq!(pids, vec!["a", "c"]);
    }

    #[test]
    fn test_ticket_sees_notification() {
        let mut queue = WaitQueue::default();
        let ticket = queue.push("a", cpu(1), 1);
        assert_eq!(ticket.try_outcome(), None);
        queue.remove("a").unwrap().notify(WaitOutcome::Granted);
        assert_eq!(ticket.try_outcome(), Some(WaitOutcome::Granted));
    }

    #[test]
    fn test_dropped_sender_reads_as_cancelled() {
        let mut queue = WaitQueue::default();
        let ticket = queue.push("a", cpu(1), 1);
        drop(queue);
        assert_eq!(ticket.wait(), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_promote_drops_unknown_head_and_continues() {
        let mut ledger = Ledger::new(Capacity::new(cpu(10), 1.0).unwrap());
        ledger.insert(ProcessRecord::new("b".into(), cpu(5), 0));
        let mut queue = WaitQueue::default();
        let ghost = queue.push("ghost", cpu(1), 1);
        let b = queue.push("b", cpu(2), 2);

        let promoted = promote_waiting(&mut ledger, &mut queue, 3);
        assert_eq!(promoted.len(), 2);
        assert!(matches!(
            ghost.try_outcome(),
            Some(WaitOutcome::Rejected(AllocError::UnknownProcess(_)))
        ));
        assert_eq!(b.try_outcome(), Some(WaitOutcome::Granted));
        assert_eq!(ledger.get("b").unwrap().status, ProcessStatus::Running);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_promote_stops_at_deferred_head() {
        let mut ledger = Ledger::new(Capacity::new(cpu(10), 1.0).unwrap());
        ledger.insert(ProcessRecord::new("a".into(), cpu(10), 0));
        ledger.insert(ProcessRecord::new("b".into(), cpu(10), 0));
        ledger.try_grant("a", cpu(8)).unwrap();
        let mut queue = WaitQueue::default();
        let _big = queue.push("b", cpu(5), 1);

        assert!(promote_waiting(&mut ledger, &mut queue, 2).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_promote_holds_grantable_follower_behind_head() {
        let mut ledger = Ledger::new(Capacity::new(cpu(10), 1.0).unwrap());
        ledger.insert(ProcessRecord::new("a".into(), cpu(10), 0));
        ledger.insert(ProcessRecord::new("b".into(), cpu(4), 0));
        ledger.insert(ProcessRecord::new("h".into(), cpu(10), 0));
        ledger.try_grant("h", cpu(6)).unwrap();
        let mut queue = WaitQueue::default();
        let a = queue.push("a", cpu(3), 1);
        let b = queue.push("b", cpu(3), 2);
        assert!(queue.is_head("a"));

        assert!(promote_waiting(&mut ledger, &mut queue, 3).is_empty());
        assert_eq!(a.try_outcome(), None);
        assert_eq!(b.try_outcome(), None);
        assert_eq!(queue.len(), 2);

        // b alone would be safe; only the queue order keeps it waiting.
        assert!(ledger.try_grant("b", cpu(3)).unwrap());
    }
}
