//! Opaque listener handles, replacing the original transport's pattern of
//! passing a raw callback pointer as the payload of a control message.
//!
//! The Node Facade owns the one [`ListenerRegistry`] for a node; managers
//! are only ever given a [`ListenerHandle`] and call back into the
//! registry to invoke it. See SPEC_FULL.md §9.

use crate::protocol::DataProduct;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An opaque reference to a registered callback. Cheap to copy, carries no
/// information about what it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// Called when a subscribed data product arrives.
pub trait DataListener: Fn(DataProduct) + Send + Sync + 'static {}
impl<T: Fn(DataProduct) + Send + Sync + 'static> DataListener for T {}

/// Called to synchronously answer a service request; returns the reply
/// payload.
pub trait ServiceProvider: Fn(DataProduct) -> Vec<u8> + Send + Sync + 'static {}
impl<T: Fn(DataProduct) -> Vec<u8> + Send + Sync + 'static> ServiceProvider for T {}

/// Called with a request's reply (or a failure code) once a Request
/// Manager round trip completes.
pub trait Requestor: Fn(crate::error::GravityResult<DataProduct>, String) + Send + Sync + 'static {}
impl<T: Fn(crate::error::GravityResult<DataProduct>, String) + Send + Sync + 'static> Requestor
    for T
{
}

/// Heartbeat listener callbacks (`firstHeartbeat`/`receivedHeartbeat`/
/// `missedHeartbeat`), bundled as one trait object per registration.
pub trait HeartbeatListener: Send + Sync + 'static {
    fn first_heartbeat(&self, component_id: &str);
    fn received_heartbeat(&self, component_id: &str);
    fn missed_heartbeat(&self, component_id: &str, microseconds_since_last: u64);
}

enum Entry {
    Data(Arc<dyn DataListener>),
    Service(Arc<dyn ServiceProvider>),
    Requestor(Arc<dyn Requestor>),
    Heartbeat(Arc<dyn HeartbeatListener>),
}

/// Per-node registry mapping opaque handles to callbacks. Owned solely by
/// the Node Facade; managers hold [`ListenerHandle`]s, never `Arc<dyn _>`
/// directly, so a manager crash or bug cannot corrupt another manager's
/// view of a callback.
#[derive(Default)]
pub struct ListenerRegistry {
    next: AtomicU64,
    entries: Mutex<HashMap<ListenerHandle, Entry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerHandle {
        ListenerHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register_data_listener(&self, listener: impl DataListener) -> ListenerHandle {
        let handle = self.allocate();
        self.entries
            .lock()
            .insert(handle, Entry::Data(Arc::new(listener)));
        handle
    }

    pub fn register_service_provider(&self, provider: impl ServiceProvider) -> ListenerHandle {
        let handle = self.allocate();
        self.entries
            .lock()
            .insert(handle, Entry::Service(Arc::new(provider)));
        handle
    }

    pub fn register_requestor(&self, requestor: impl Requestor) -> ListenerHandle {
        let handle = self.allocate();
        self.entries
            .lock()
            .insert(handle, Entry::Requestor(Arc::new(requestor)));
        handle
    }

    pub fn register_heartbeat_listener(
        &self,
        listener: impl HeartbeatListener,
    ) -> ListenerHandle {
        let handle = self.allocate();
        self.entries
            .lock()
            .insert(handle, Entry::Heartbeat(Arc::new(listener)));
        handle
    }

    pub fn unregister(&self, handle: ListenerHandle) {
        self.entries.lock().remove(&handle);
    }

    /// Invoke a data listener. A callback that panics is caught at this
    /// boundary, logged, and does not propagate into the owning manager's
    /// loop (SPEC_FULL.md §7).
    pub fn invoke_data(&self, handle: ListenerHandle, product: DataProduct) {
        let callback = match self.entries.lock().get(&handle) {
            Some(Entry::Data(cb)) => cb.clone(),
            _ => return,
        };
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(product))).is_err() {
            tracing::error!(?handle, "data listener panicked");
        }
    }

    pub fn invoke_service(&self, handle: ListenerHandle, request: DataProduct) -> Option<Vec<u8>> {
        let callback = match self.entries.lock().get(&handle) {
            Some(Entry::Service(cb)) => cb.clone(),
            _ => return None,
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(request))) {
            Ok(reply) => Some(reply),
            Err(_) => {
                tracing::error!(?handle, "service provider panicked");
                None
            }
        }
    }

    pub fn invoke_requestor(
        &self,
        handle: ListenerHandle,
        result: crate::error::GravityResult<DataProduct>,
        request_id: String,
    ) {
        let callback = match self.entries.lock().get(&handle) {
            Some(Entry::Requestor(cb)) => cb.clone(),
            _ => return,
        };
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(result, request_id)
        }))
        .is_err()
        {
            tracing::error!(?handle, "requestor callback panicked");
        }
    }

    pub fn with_heartbeat_listener<R>(
        &self,
        handle: ListenerHandle,
        f: impl FnOnce(&dyn HeartbeatListener) -> R,
    ) -> Option<R> {
        match self.entries.lock().get(&handle) {
            Some(Entry::Heartbeat(cb)) => Some(f(cb.as_ref())),
            _ => None,
        }
    }
}
