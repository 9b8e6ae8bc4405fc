//! Outstanding requests.

use crate::kernel::Kernel;
use kernbus_types::{CorrelationId, KernelId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// A request waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub correlation_id: CorrelationId,
    pub request_type: String,
    pub response_type: String,
    /// Kernel holding the response waiter.
    pub response_kernel: KernelId,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingTable {
    pub(crate) fn insert(&self, request: PendingRequest) {
        self.entries.lock().insert(request.correlation_id, request);
    }

    pub(crate) fn remove(&self, correlation_id: &CorrelationId) -> Option<PendingRequest> {
        self.entries.lock().remove(correlation_id)
    }

    /// Removes and returns entries whose deadline is at or before `now`.
    pub(crate) fn take_expired(&self, now: Instant) -> Vec<PendingRequest> {
        let mut entries = self.entries.lock();
        let expired: Vec<CorrelationId> = entries
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.correlation_id)
            .collect();
        expired
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect()
    }

    pub(crate) fn list(&self) -> Vec<PendingRequest> {
        let mut list: Vec<PendingRequest> = self.entries.lock().values().cloned().collect();
        list.sort_by_key(|p| p.deadline);
        list
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Removes a request's pending entry and waiter when the request ends,
/// whichever way it ends.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    kernel: Arc<Kernel>,
    response_type: String,
    correlation_id: CorrelationId,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a PendingTable, kernel: Arc<Kernel>, request: PendingRequest) -> Self {
        let guard = Self {
            table,
            kernel,
            response_type: request.response_type.clone(),
            correlation_id: request.correlation_id,
        };
        table.insert(request);
        guard
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.correlation_id);
        self.kernel
            .remove_waiter(&self.response_type, self.correlation_id);
    }
}
