//! One-shot response waiters.

use crate::kernel::KernelFault;
use kernbus_event::Event;
use kernbus_types::CorrelationId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What a waiter resolves with: the matching event, or the fault of the
/// kernel that owned it.
pub type WaiterResult = Result<Arc<Event>, KernelFault>;

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<WaiterResult>,
    deadline: Instant,
}

/// Waiters keyed by `(event type, correlation id)`.
#[derive(Debug, Default)]
pub(crate) struct WaiterTable {
    waiters: HashMap<(String, CorrelationId), Waiter>,
}

impl WaiterTable {
    /// Returns `None` if the key is already taken.
    pub(crate) fn insert(
        &mut self,
        event_type: &str,
        correlation_id: CorrelationId,
        deadline: Instant,
    ) -> Option<oneshot::Receiver<WaiterResult>> {
        let key = (event_type.to_string(), correlation_id);
        if self.waiters.contains_key(&key) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(key, Waiter { tx, deadline });
        Some(rx)
    }

    pub(crate) fn take(
        &mut self,
        event_type: &str,
        correlation_id: CorrelationId,
    ) -> Option<oneshot::Sender<WaiterResult>> {
        self.waiters
            .remove(&(event_type.to_string(), correlation_id))
            .map(|w| w.tx)
    }

    pub(crate) fn remove(&mut self, event_type: &str, correlation_id: CorrelationId) -> bool {
        self.take(event_type, correlation_id).is_some()
    }

    /// Drops waiters past their deadline, which closes their receivers.
    pub(crate) fn reap_expired(&mut self, now: Instant) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|_, w| w.deadline > now);
        before - self.waiters.len()
    }

    /// Resolves every waiter with `fault`.
    pub(crate) fn fail_all(&mut self, fault: &KernelFault) -> usize {
        let count = self.waiters.len();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.tx.send(Err(fault.clone()));
        }
        count
    }

    /// Drops every waiter without resolving it.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn take_resolves_receiver() {
        let mut table = WaiterTable::default();
        let cid = CorrelationId::new();
        let rx = table.insert("tool.response", cid, far()).unwrap();

        let event = Arc::new(Event::new("tool.response", "acme", Value::Null).unwrap());
        let tx = table.take("tool.response", cid).unwrap();
        tx.send(Ok(Arc::clone(&event))).unwrap();

        assert_eq!(rx.await.unwrap().unwrap().id(), event.id());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn duplicate_key_is_refused() {
        let mut table = WaiterTable::default();
        let cid = CorrelationId::new();
        assert!(table.insert("r", cid, far()).is_some());
        assert!(table.insert("r", cid, far()).is_none());
        // a different type under the same correlation is a different key
        assert!(table.insert("other", cid, far()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reap_closes_expired_receivers() {
        let mut table = WaiterTable::default();
        let soon = Instant::now() + Duration::from_millis(10);
        let rx = table.insert("r", CorrelationId::new(), soon).unwrap();
        let _kept = table.insert("r", CorrelationId::new(), far()).unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(table.reap_expired(Instant::now()), 1);
        assert!(rx.await.is_err());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn fail_all_delivers_fault() {
        let mut table = WaiterTable::default();
        let rx = table.insert("r", CorrelationId::new(), far()).unwrap();
        let fault = KernelFault::Failed {
            reason: "operator stop".into(),
        };

        assert_eq!(table.fail_all(&fault), 1);
        assert_eq!(rx.await.unwrap().unwrap_err(), fault);
    }
}
