//! The install barrier.
//!
//! Every node arrives exactly once, after installing (or after failing
//! anywhere before that). The gate opens when all nodes have arrived
//! successfully; a single failed arrival poisons it, releasing waiters
//! immediately with a "do not build" answer.
//!
//! Arrival is tied to a [`GateTicket`]: dropping a ticket that has not
//! arrived counts as a failed arrival, so a node that errors out or panics
//! can never leave the others waiting.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    arrived: usize,
    failed: bool,
}

#[derive(Debug)]
pub struct InstallGate {
    parties: usize,
    state: watch::Sender<GateState>,
}

impl InstallGate {
    pub fn new(parties: usize) -> Arc<Self> {
        let (state, _) = watch::channel(GateState {
            arrived: 0,
            failed: false,
        });
        Arc::new(Self { parties, state })
    }

    /// One ticket per node.
    pub fn ticket(self: &Arc<Self>) -> GateTicket {
        GateTicket {
            gate: Some(self.clone()),
        }
    }

    fn arrive(&self, ok: bool) {
        self.state.send_modify(|s| {
            s.arrived += 1;
            s.failed |= !ok;
        });
    }

    /// Wait until the gate opens (`true`) or is poisoned (`false`).
    pub async fn passage(&self) -> bool {
        let mut rx = self.state.subscribe();
        let parties = self.parties;
        match rx.wait_for(|s| s.failed || s.arrived >= parties).await {
            Ok(state) => !state.failed,
            Err(_) => false,
        }
    }

    /// Wait until every node has arrived, whatever the outcome.
    pub async fn all_arrived(&self) {
        let mut rx = self.state.subscribe();
        let parties = self.parties;
        let _ = rx.wait_for(|s| s.arrived >= parties).await;
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.borrow().failed
    }
}

/// A node's single arrival at the gate.
#[derive(Debug)]
pub struct GateTicket {
    gate: Option<Arc<InstallGate>>,
}

impl GateTicket {
    /// Arrive successfully and wait for the other nodes.
    /// Returns `false` if another node failed and this one must not build.
    pub async fn arrive_and_wait(mut self) -> bool {
        match self.gate.take() {
            Some(gate) => {
                gate.arrive(true);
                gate.passage().await
            }
            None => false,
        }
    }
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.arrive(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_opens_when_every_party_arrives() {
        let gate = InstallGate::new(3);
        let mut waiters = Vec::new();
        for i in 0..3u64 {
            let ticket = gate.ticket();
            waiters.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                ticket.arrive_and_wait().await
            }));
        }
        for w in waiters {
            assert!(w.await.unwrap());
        }
        gate.all_arrived().await;
        assert!(!gate.is_poisoned());
    }

    #[tokio::test]
    async fn test_dropped_ticket_poisons_waiters() {
        let gate = InstallGate::new(2);
        let ok = gate.ticket();
        let failed = gate.ticket();
        let waiter = tokio::spawn(async move { ok.arrive_and_wait().await });
        drop(failed);
        assert!(!waiter.await.unwrap());
        assert!(gate.is_poisoned());
    }

    #[tokio::test]
    async fn test_poison_releases_waiters_before_all_arrive() {
        let gate = InstallGate::new(3);
        let first = gate.ticket();
        let second = gate.ticket();
        let _late = gate.ticket();

        let waiter = tokio::spawn(async move { first.arrive_and_wait().await });
        drop(second);
        let passed = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("poisoned gate must release waiters")
            .unwrap();
        assert!(!passed);
    }

    #[tokio::test]
    async fn test_all_arrived_waits_for_stragglers_even_when_poisoned() {
        let gate = InstallGate::new(2);
        drop(gate.ticket());
        let late = gate.ticket();

        let pending = tokio::time::timeout(Duration::from_millis(50), gate.all_arrived()).await;
        assert!(pending.is_err());

        drop(late);
        tokio::time::timeout(Duration::from_secs(5), gate.all_arrived())
            .await
            .expect("all parties have arrived");
    }

    #[tokio::test]
    async fn test_zero_parties_is_open() {
        let gate = InstallGate::new(0);
        assert!(gate.passage().await);
        gate.all_arrived().await;
    }
}
