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


//! Fixtures shared by the unit tests of every module.

use crate::client::{self, RuleSource};
use crate::operator::{Operator, OperatorOptions};
use crate::rules::cache::RuleCache;
use crate::rules::file::OperatorRuleFileNaming;
use crate::rules::registry::RulerRegistry;
use crate::rules::selector::Selector;
use crate::rules::store::{ConflictSnafu, NotFoundSnafu, ResourceStore, StoreError};
use crate::types::v1::prometheus::{Prometheus, PrometheusSpec};
use crate::types::v1::prometheus_rule::{PrometheusRule, Rule, RuleGroup};
use crate::types::v1::thanos_ruler::{ThanosRuler, ThanosRulerSpec};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const MONITORING_NAMESPACE: &str = "kubesphere-monitoring-system";

pub const THANOS_RULE_RESOURCE_LABELS: [(&str, &str); 2] =
    [("thanosruler", "thanos-ruler"), ("role", "thanos-alerting-rules")];

pub const PROMETHEUS_RULE_RESOURCE_LABELS: [(&str, &str); 2] =
    [("prometheus", "k8s"), ("role", "alert-rules")];

const RULE_RESOURCE_KIND: &str = "PrometheusRule";

fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn alert_rule(name: &str, expr: &str) -> Rule {
    Rule {
        alert: Some(name.to_string()),
        expr: IntOrString::String(expr.to_string()),
        ..Default::default()
    }
}

pub fn rule_group(name: &str, rules: Vec<Rule>) -> RuleGroup {
    RuleGroup {
        name: name.to_string(),
        rules,
        ..Default::default()
    }
}

pub fn rule_resource(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    groups: Vec<RuleGroup>,
) -> PrometheusRule {
    let mut resource = PrometheusRule::new(name, Default::default());
    resource.metadata.namespace = Some(namespace.to_string());
    resource.metadata.labels = Some(label_map(labels));
    resource.spec.groups = groups;
    resource
}

/// Thanos Ruler loading labelled resources from every namespace.
pub fn thanos_ruler_resource() -> ThanosRuler {
    let mut resource = ThanosRuler::new(
        "thanos-ruler",
        ThanosRulerSpec {
            rule_selector: Some(metav1::LabelSelector {
                match_labels: Some(label_map(&THANOS_RULE_RESOURCE_LABELS)),
                ..Default::default()
            }),
            rule_namespace_selector: Some(metav1::LabelSelector::default()),
            ..Default::default()
        },
    );
    resource.metadata.namespace = Some(MONITORING_NAMESPACE.to_string());
    resource
}

/// Prometheus loading labelled resources from its own namespace only.
pub fn prometheus_resource() -> Prometheus {
    let mut resource = Prometheus::new(
        "k8s",
        PrometheusSpec {
            rule_selector: Some(metav1::LabelSelector {
                match_labels: Some(label_map(&PROMETHEUS_RULE_RESOURCE_LABELS)),
                ..Default::default()
            }),
            rule_namespace_selector: None,
        },
    );
    resource.metadata.namespace = Some(MONITORING_NAMESPACE.to_string());
    resource
}

type ObjectKey = (String, String);
type ConcurrentWrite = Box<dyn FnOnce(&mut PrometheusRule) + Send>;

#[derive(Default)]
struct MemoryState {
    resources: BTreeMap<ObjectKey, PrometheusRule>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    version: u64,
    generated: u64,
    concurrent_writes: HashMap<ObjectKey, VecDeque<ConcurrentWrite>>,
    writes: usize,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// A resource store with API server semantics: resource versions, generated
/// names and preconditioned deletes. Writes can be mirrored into a
/// [`RuleCache`] the way a watch would.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    cache: Option<Arc<RuleCache>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        for namespace in ["test", "other", MONITORING_NAMESPACE] {
            state.namespaces.insert(
                namespace.to_string(),
                label_map(&[("kubernetes.io/metadata.name", namespace)]),
            );
        }
        Self {
            state: Mutex::new(state),
            cache: None,
        }
    }

    pub fn with_cache(cache: Arc<RuleCache>) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new()
        }
    }

    /// Stores `resource` as-is, bypassing version checks.
    pub async fn insert(&self, mut resource: PrometheusRule) -> PrometheusRule {
        let mut state = self.state.lock().await;
        resource.metadata.resource_version = Some(state.next_version());
        resource.metadata.uid = Some(format!("uid-{}", state.version));
        let key = object_key(&resource);
        state.resources.insert(key, resource.clone());
        self.mirror_apply(&resource).await;
        resource
    }

    pub async fn resources(&self, namespace: &str) -> Vec<PrometheusRule> {
        self.state
            .lock()
            .await
            .resources
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Alert names across all resources in `namespace`, duplicates kept.
    pub async fn rule_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .resources(namespace)
            .await
            .iter()
            .flat_map(|r| r.spec.groups.iter())
            .flat_map(|g| g.rules.iter())
            .map(|r| r.alert_name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Applies `write` to the stored object right before a later replace of
    /// it, as if another client got there first. Queued writes are consumed
    /// one per replace.
    pub async fn interleave_write<F>(&self, namespace: &str, name: &str, write: F)
    where
        F: FnOnce(&mut PrometheusRule) + Send + 'static,
    {
        self.state
            .lock()
            .await
            .concurrent_writes
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .push_back(Box::new(write));
    }

    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    async fn mirror_apply(&self, resource: &PrometheusRule) {
        if let Some(cache) = &self.cache {
            cache.apply(resource).await;
        }
    }
}

fn object_key(resource: &PrometheusRule) -> ObjectKey {
    (
        resource.metadata.namespace.clone().unwrap_or_default(),
        resource.metadata.name.clone().unwrap_or_default(),
    )
}

fn not_found(namespace: &str, name: &str) -> StoreError {
    NotFoundSnafu {
        kind: RULE_RESOURCE_KIND,
        namespace,
        name,
    }
    .build()
}

fn conflict(namespace: &str, name: &str, message: &str) -> StoreError {
    ConflictSnafu {
        kind: RULE_RESOURCE_KIND,
        namespace,
        name,
        message,
    }
    .build()
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_rule_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PrometheusRule, StoreError> {
        self.state
            .lock()
            .await
            .resources
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn list_rule_resources(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<PrometheusRule>, StoreError> {
        Ok(self
            .resources(namespace)
            .await
            .into_iter()
            .filter(|r| selector.matches(&r.metadata.labels.clone().unwrap_or_default()))
            .collect())
    }

    async fn create_rule_resource(
        &self,
        namespace: &str,
        resource: &PrometheusRule,
    ) -> Result<PrometheusRule, StoreError> {
        let mut state = self.state.lock().await;
        let mut created = resource.clone();
        if created.metadata.name.is_none() {
            state.generated += 1;
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{prefix}{:05x}", state.generated));
        }
        created.metadata.namespace = Some(namespace.to_string());
        let key = object_key(&created);
        if state.resources.contains_key(&key) {
            return Err(conflict(namespace, &key.1, "already exists"));
        }
        created.metadata.resource_version = Some(state.next_version());
        created.metadata.uid = Some(format!("uid-{}", state.version));
        state.resources.insert(key, created.clone());
        state.writes += 1;
        self.mirror_apply(&created).await;
        Ok(created)
    }

    async fn replace_rule_resource(
        &self,
        namespace: &str,
        resource: &PrometheusRule,
    ) -> Result<PrometheusRule, StoreError> {
        let name = resource.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let mut state = self.state.lock().await;

        let pending = state
            .concurrent_writes
            .get_mut(&key)
            .and_then(|writes| writes.pop_front());
        if let Some(write) = pending {
            let version = state.next_version();
            if let Some(stored) = state.resources.get_mut(&key) {
                write(&mut *stored);
                stored.metadata.resource_version = Some(version);
                let stored = stored.clone();
                self.mirror_apply(&stored).await;
            }
        }

        let Some(stored) = state.resources.get(&key) else {
            return Err(not_found(namespace, &name));
        };
        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(conflict(namespace, &name, "resource version changed"));
        }

        let mut replaced = resource.clone();
        replaced.metadata.uid = stored.metadata.uid.clone();
        replaced.metadata.resource_version = Some(state.next_version());
        state.resources.insert(key, replaced.clone());
        state.writes += 1;
        self.mirror_apply(&replaced).await;
        Ok(replaced)
    }

    async fn delete_rule_resource(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock().await;
        let Some(stored) = state.resources.get(&key) else {
            return Err(not_found(namespace, name));
        };
        if resource_version.is_some()
            && stored.metadata.resource_version.as_deref() != resource_version
        {
            return Err(conflict(namespace, name, "precondition failed"));
        }
        if let Some(removed) = state.resources.remove(&key) {
            state.writes += 1;
            if let Some(cache) = &self.cache {
                cache.delete(&removed).await;
            }
        }
        Ok(())
    }

    async fn namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        self.state
            .lock()
            .await
            .namespaces
            .get(namespace)
            .cloned()
            .ok_or_else(|| NotFoundSnafu {
                kind: "Namespace",
                namespace: "",
                name: namespace,
            }
            .build())
    }
}

/// A rules endpoint answering with fixed groups.
#[derive(Default)]
pub struct StaticRuleSource {
    groups: Mutex<Vec<client::RuleGroup>>,
}

impl StaticRuleSource {
    pub async fn set(&self, groups: Vec<client::RuleGroup>) {
        *self.groups.lock().await = groups;
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn alerting_rules(
        &self,
        _matchers: &[String],
    ) -> Result<Vec<client::RuleGroup>, client::Error> {
        Ok(self.groups.lock().await.clone())
    }
}

/// An operator over a fresh [`MemoryStore`] whose writes feed its cache.
/// Without `thanos_ruler` no Thanos Ruler is known and custom rules are
/// disabled.
pub async fn custom_rule_operator(thanos_ruler: bool) -> (Arc<Operator>, Arc<MemoryStore>) {
    let (operator, store, _, _) = operator_parts(thanos_ruler).await;
    (operator, store)
}

/// Like [`custom_rule_operator`], also handing out the watch-fed parts.
pub async fn operator_parts(
    thanos_ruler: bool,
) -> (Arc<Operator>, Arc<MemoryStore>, Arc<RuleCache>, Arc<RulerRegistry>) {
    let cache = Arc::new(RuleCache::new());
    let store = Arc::new(MemoryStore::with_cache(cache.clone()));
    let rulers = Arc::new(RulerRegistry::new(
        store.clone(),
        Default::default(),
        None,
        None,
    ));
    let thanos: Option<Arc<dyn RuleSource>> = if thanos_ruler {
        rulers.set_thanos_ruler(thanos_ruler_resource()).await;
        Some(Arc::new(StaticRuleSource::default()))
    } else {
        None
    };
    let options = OperatorOptions {
        custom_rule_resource_labels: label_map(&THANOS_RULE_RESOURCE_LABELS),
        ..Default::default()
    };
    let operator = Operator::new(
        cache.clone(),
        rulers.clone(),
        Arc::new(StaticRuleSource::default()),
        thanos,
        Arc::new(OperatorRuleFileNaming),
        options,
    );
    (Arc::new(operator), store, cache, rulers)
}
