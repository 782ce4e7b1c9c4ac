//! COV subscriptions held by the client side.
//!
//! Notifications are routed by subscriber process id. A [`CovSubscription`]
//! owns a delivery task that invokes the callback in arrival order; dropping
//! it removes the route and stops the task.

use crate::{Address, ClientDataValue};
use bacscope_core::services::cov_notification::CovNotificationRequest;
use bacscope_core::types::{ObjectId, PropertyId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct CovPropertyValue {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: ClientDataValue,
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CovNotification {
    pub source: Address,
    pub confirmed: bool,
    pub subscriber_process_id: u32,
    pub initiating_device_id: ObjectId,
    pub monitored_object_id: ObjectId,
    pub time_remaining_seconds: u32,
    pub values: Vec<CovPropertyValue>,
}

impl CovNotification {
    pub(crate) fn from_request(
        source: Address,
        confirmed: bool,
        request: CovNotificationRequest<'_>,
    ) -> Self {
        Self {
            source,
            confirmed,
            subscriber_process_id: request.subscriber_process_id,
            initiating_device_id: request.initiating_device_id,
            monitored_object_id: request.monitored_object_id,
            time_remaining_seconds: request.time_remaining_seconds,
            values: request
                .values
                .into_iter()
                .map(|v| CovPropertyValue {
                    property_id: v.property_id,
                    array_index: v.array_index,
                    value: v.value.into(),
                    priority: v.priority,
                })
                .collect(),
        }
    }
}

pub type CovFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback run for every `(property, value)` pair of a notification.
pub enum CovCallback {
    Sync(Box<dyn FnMut(PropertyId, ClientDataValue) + Send>),
    Async(Box<dyn FnMut(PropertyId, ClientDataValue) -> CovFuture + Send>),
}

impl CovCallback {
    pub fn sync(f: impl FnMut(PropertyId, ClientDataValue) + Send + 'static) -> Self {
        Self::Sync(Box::new(f))
    }

    pub fn asynchronous<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(PropertyId, ClientDataValue) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Async(Box::new(move |property, value| Box::pin(f(property, value))))
    }

    async fn invoke(&mut self, property: PropertyId, value: ClientDataValue) {
        match self {
            Self::Sync(f) => f(property, value),
            Self::Async(f) => f(property, value).await,
        }
    }
}

impl std::fmt::Debug for CovCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("CovCallback::Sync"),
            Self::Async(_) => f.write_str("CovCallback::Async"),
        }
    }
}

/// Process-id keyed routes from the dispatcher to subscriptions.
#[derive(Debug)]
pub(crate) struct CovRegistry {
    routes: Mutex<HashMap<u32, mpsc::UnboundedSender<CovNotification>>>,
    next_process_id: AtomicU32,
}

impl Default for CovRegistry {
    fn default() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            next_process_id: AtomicU32::new(1),
        }
    }
}

impl CovRegistry {
    pub(crate) fn register(&self) -> (u32, mpsc::UnboundedReceiver<CovNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = match self.routes.lock() {
            Ok(routes) => routes,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut process_id = self.next_process_id.fetch_add(1, Ordering::Relaxed);
        while process_id == 0 || routes.contains_key(&process_id) {
            process_id = self.next_process_id.fetch_add(1, Ordering::Relaxed);
        }
        routes.insert(process_id, tx);
        (process_id, rx)
    }

    pub(crate) fn remove(&self, process_id: u32) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&process_id);
        }
    }

    /// Hands `notification` to its subscription. `false` when nobody is subscribed.
    pub(crate) fn deliver(&self, notification: CovNotification) -> bool {
        let Ok(routes) = self.routes.lock() else {
            return false;
        };
        match routes.get(&notification.subscriber_process_id) {
            Some(tx) => tx.send(notification).is_ok(),
            None => false,
        }
    }
}

/// A live COV subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct CovSubscription {
    pub(crate) address: Address,
    pub(crate) object_id: ObjectId,
    pub(crate) process_id: u32,
    pub(crate) confirmed: bool,
    pub(crate) lifetime_seconds: u32,
    registry: Arc<CovRegistry>,
    task: JoinHandle<()>,
}

impl CovSubscription {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        registry: Arc<CovRegistry>,
        process_id: u32,
        mut rx: mpsc::UnboundedReceiver<CovNotification>,
        mut callback: CovCallback,
        address: Address,
        object_id: ObjectId,
        confirmed: bool,
        lifetime_seconds: u32,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                for value in notification.values {
                    callback.invoke(value.property_id, value.value).await;
                }
            }
        });
        Self {
            address,
            object_id,
            process_id,
            confirmed,
            lifetime_seconds,
            registry,
            task,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for CovSubscription {
    fn drop(&mut self) {
        self.registry.remove(self.process_id);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn notification(process_id: u32, value: f32) -> CovNotification {
        CovNotification {
            source: "127.0.0.1:47809".parse().unwrap(),
            confirmed: false,
            subscriber_process_id: process_id,
            initiating_device_id: ObjectId::new(bacscope_core::types::ObjectType::Device, 1),
            monitored_object_id: ObjectId::new(bacscope_core::types::ObjectType::AnalogValue, 1),
            time_remaining_seconds: 0,
            values: vec![CovPropertyValue {
                property_id: PropertyId::PresentValue,
                array_index: None,
                value: ClientDataValue::Real(value),
                priority: None,
            }],
        }
    }

    #[tokio::test]
    async fn delivery_in_order_then_drop_removes_route() {
        let registry = Arc::new(CovRegistry::default());
        let (pid, rx) = registry.register();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let sub = CovSubscription::start(
            Arc::clone(&registry),
            pid,
            rx,
            CovCallback::asynchronous(move |_, value| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(value);
                }
            }),
            "127.0.0.1:47809".parse().unwrap(),
            ObjectId::new(bacscope_core::types::ObjectType::AnalogValue, 1),
            false,
            0,
        );
        for v in [1.0, 2.0, 3.0] {
            assert!(registry.deliver(notification(pid, v)));
        }
        for v in [1.0, 2.0, 3.0] {
            let got = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, ClientDataValue::Real(v));
        }
        drop(sub);
        assert!(!registry.deliver(notification(pid, 4.0)));
    }

    #[test]
    fn process_ids_are_unique() {
        let registry = CovRegistry::default();
        let (a, _ra) = registry.register();
        let (b, _rb) = registry.register();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }
}
