// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Tracks the rule engines deployed in the monitoring namespace.

use crate::rules::ruler::{PrometheusRuler, ResourceLocks, Ruler, RulerOptions, ThanosRuler};
use crate::rules::store::ResourceStore;
use crate::types::v1::prometheus::Prometheus;
use crate::types::v1::thanos_ruler::ThanosRuler as ThanosRulerResource;
use kube::ResourceExt;
use kube::runtime::watcher;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::info;

/// Engine resources of one kind, keyed by name.
struct Engines<K> {
    kind: &'static str,
    pinned: Option<String>,
    current: RwLock<BTreeMap<String, K>>,
    relist: Mutex<Option<BTreeMap<String, K>>>,
    synced: watch::Sender<bool>,
}

impl<K> Engines<K>
where
    K: ResourceExt + Clone + Send + Sync,
{
    fn new(kind: &'static str, pinned: Option<String>) -> Self {
        Self {
            kind,
            pinned,
            current: RwLock::new(BTreeMap::new()),
            relist: Mutex::new(None),
            synced: watch::Sender::new(false),
        }
    }

    async fn wait_until_synced(&self) {
        let _ = self.synced.subscribe().wait_for(|synced| *synced).await;
    }

    /// The pinned engine, or the first by name when none is pinned.
    async fn selected(&self) -> Option<K> {
        let current = self.current.read().await;
        match &self.pinned {
            Some(name) => current.get(name).cloned(),
            None => current.values().next().cloned(),
        }
    }

    async fn set(&self, resource: K) {
        let name = resource.name_any();
        info!(kind = self.kind, name = %name, "rule engine registered");
        self.current.write().await.insert(name, resource);
    }

    async fn handle_event(&self, event: watcher::Event<K>) {
        match event {
            watcher::Event::Apply(resource) => self.set(resource).await,
            watcher::Event::Delete(resource) => {
                let name = resource.name_any();
                info!(kind = self.kind, name = %name, "rule engine removed");
                self.current.write().await.remove(&name);
            }
            watcher::Event::Init => *self.relist.lock().await = Some(BTreeMap::new()),
            watcher::Event::InitApply(resource) => {
                if let Some(staged) = self.relist.lock().await.as_mut() {
                    staged.insert(resource.name_any(), resource);
                }
            }
            watcher::Event::InitDone => {
                if let Some(staged) = self.relist.lock().await.take() {
                    info!(kind = self.kind, count = staged.len(), "rule engines listed");
                    *self.current.write().await = staged;
                    self.synced.send_replace(true);
                }
            }
        }
    }
}

/// Builds [`Ruler`]s for the engines currently deployed.
pub struct RulerRegistry {
    store: Arc<dyn ResourceStore>,
    locks: Arc<ResourceLocks>,
    options: RulerOptions,
    prometheuses: Engines<Prometheus>,
    thanos_rulers: Engines<ThanosRulerResource>,
}

impl RulerRegistry {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        options: RulerOptions,
        prometheus_name: Option<String>,
        thanos_ruler_name: Option<String>,
    ) -> Self {
        Self {
            store,
            locks: Arc::new(ResourceLocks::default()),
            options,
            prometheuses: Engines::new("Prometheus", prometheus_name),
            thanos_rulers: Engines::new("ThanosRuler", thanos_ruler_name),
        }
    }

    pub async fn prometheus_ruler(&self) -> Option<Arc<dyn Ruler>> {
        let resource = self.prometheuses.selected().await?;
        Some(Arc::new(PrometheusRuler::new(resource, self.store.clone())))
    }

    pub async fn thanos_ruler(&self) -> Option<Arc<dyn Ruler>> {
        let resource = self.thanos_rulers.selected().await?;
        Some(Arc::new(ThanosRuler::new(
            resource,
            self.store.clone(),
            self.locks.clone(),
            self.options,
        )))
    }

    pub async fn set_prometheus(&self, resource: Prometheus) {
        self.prometheuses.set(resource).await;
    }

    pub async fn set_thanos_ruler(&self, resource: ThanosRulerResource) {
        self.thanos_rulers.set(resource).await;
    }

    /// Waits until both engine kinds have been listed once.
    pub async fn wait_until_synced(&self) {
        self.prometheuses.wait_until_synced().await;
        self.thanos_rulers.wait_until_synced().await;
    }

    pub fn is_synced(&self) -> bool {
        *self.prometheuses.synced.borrow() && *self.thanos_rulers.synced.borrow()
    }

    pub async fn handle_prometheus_event(&self, event: watcher::Event<Prometheus>) {
        self.prometheuses.handle_event(event).await;
    }

    pub async fn handle_thanos_ruler_event(&self, event: watcher::Event<ThanosRulerResource>) {
        self.thanos_rulers.handle_event(event).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{MemoryStore, prometheus_resource, thanos_ruler_resource};

    fn registry(prometheus: Option<&str>) -> RulerRegistry {
        RulerRegistry::new(
            Arc::new(MemoryStore::new()),
            RulerOptions::default(),
            prometheus.map(str::to_string),
            None,
        )
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_rulers() {
        let registry = registry(None);
        assert!(registry.prometheus_ruler().await.is_none());
        assert!(registry.thanos_ruler().await.is_none());
    }

    #[tokio::test]
    async fn test_events_register_and_remove_engines() {
        let registry = registry(None);
        registry
            .handle_thanos_ruler_event(watcher::Event::Apply(thanos_ruler_resource()))
            .await;
        let ruler = registry.thanos_ruler().await.unwrap();
        assert_eq!(ruler.kind(), "thanos");

        registry
            .handle_thanos_ruler_event(watcher::Event::Delete(thanos_ruler_resource()))
            .await;
        assert!(registry.thanos_ruler().await.is_none());
    }

    #[tokio::test]
    async fn test_relist_replaces_engines() {
        let registry = registry(None);
        registry.set_prometheus(prometheus_resource()).await;

        registry.handle_prometheus_event(watcher::Event::Init).await;
        // still served while the relist is in flight
        assert!(registry.prometheus_ruler().await.is_some());
        registry.handle_prometheus_event(watcher::Event::InitDone).await;
        assert!(registry.prometheus_ruler().await.is_none());
    }

    #[tokio::test]
    async fn test_synced_after_both_kinds_are_listed() {
        let registry = registry(None);
        registry.set_prometheus(prometheus_resource()).await;
        assert!(!registry.is_synced());

        registry.handle_prometheus_event(watcher::Event::Init).await;
        registry.handle_prometheus_event(watcher::Event::InitDone).await;
        assert!(!registry.is_synced());

        registry.handle_thanos_ruler_event(watcher::Event::Init).await;
        registry
            .handle_thanos_ruler_event(watcher::Event::InitApply(thanos_ruler_resource()))
            .await;
        registry.handle_thanos_ruler_event(watcher::Event::InitDone).await;
        assert!(registry.is_synced());
        registry.wait_until_synced().await;
        assert!(registry.thanos_ruler().await.is_some());
    }

    #[tokio::test]
    async fn test_pinned_name_is_honoured() {
        let registry = registry(Some("k8s"));
        let mut other = prometheus_resource();
        other.metadata.name = Some("a-first".to_string());
        registry.set_prometheus(other).await;
        assert!(registry.prometheus_ruler().await.is_none());

        registry.set_prometheus(prometheus_resource()).await;
        assert!(registry.prometheus_ruler().await.is_some());
    }
}
