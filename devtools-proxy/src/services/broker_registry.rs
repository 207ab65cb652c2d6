//! Owns the live page brokers.
//!
//! Brokers are created lazily on first client contact and dissolved only at
//! process shutdown; upstream reconnects happen inside the broker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::metrics::METRICS_ID_PROXY_BROKERS_OPEN;
use crate::services::page_broker::{self, PageBroker};

/// All live page brokers, keyed by page id. Cheap to clone.
#[derive(Clone)]
pub(crate) struct BrokerRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<RuntimeConfig>,
    cancel: CancellationToken,
    brokers: Mutex<HashMap<String, PageBroker>>,
}

impl BrokerRegistry {
    pub(crate) fn new(config: Arc<RuntimeConfig>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                cancel,
                brokers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the broker for the page, creating it on first contact.
    ///
    /// Creation also spawns the broker's upstream reader; later attaches for
    /// the same page reuse both.
    pub(crate) fn get_or_create(&self, page_id: &str) -> PageBroker {
        let mut brokers = self.inner.brokers.lock();
        if let Some(broker) = brokers.get(page_id) {
            return broker.clone();
        }
        let broker = PageBroker::new(page_id.to_owned(), Arc::clone(&self.inner.config));
        tokio::spawn(page_broker::upstream_reader_task(
            broker.clone(),
            self.inner.cancel.child_token(),
        ));
        ::metrics::gauge!(METRICS_ID_PROXY_BROKERS_OPEN).increment(1);
        brokers.insert(page_id.to_owned(), broker.clone());
        broker
    }

    /// Drains every broker: closes all client sockets and upstream
    /// connections.
    pub(crate) async fn shutdown(&self) {
        let brokers: Vec<PageBroker> = self.inner.brokers.lock().values().cloned().collect();
        for broker in brokers {
            broker.shutdown().await;
        }
    }
}
