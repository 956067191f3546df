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


//! In-memory index of PrometheusRule resources, fed by a watch.

use crate::rules::fingerprint::gen_resource_rule_id;
use crate::rules::ruler::{self, RuleLookupKey, Ruler};
use crate::rules::selector::Selector;
use crate::types::v1::prometheus_rule::{PrometheusRule, Rule};
use kube::runtime::watcher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRuleItem {
    pub resource_name: String,
    pub group: String,
    pub id: String,
    pub rule: Rule,
}

/// The alerting rules of one resource, indexed by id and by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceRuleCollection {
    pub uid: Option<String>,
    pub group_set: BTreeSet<String>,
    pub id_rules: BTreeMap<String, ResourceRuleItem>,
    pub name_rules: BTreeMap<String, Vec<ResourceRuleItem>>,
}

impl ResourceRuleCollection {
    fn build(resource_name: &str, resource: &PrometheusRule) -> Self {
        let mut collection = ResourceRuleCollection {
            uid: resource.metadata.uid.clone(),
            ..Default::default()
        };
        for group in &resource.spec.groups {
            collection.group_set.insert(group.name.clone());
            for rule in group.rules.iter().filter(|r| r.is_alerting()) {
                let id = gen_resource_rule_id(&group.name, rule);
                if collection.id_rules.contains_key(&id) {
                    continue;
                }
                let item = ResourceRuleItem {
                    resource_name: resource_name.to_string(),
                    group: group.name.clone(),
                    id: id.clone(),
                    rule: rule.clone(),
                };
                collection
                    .name_rules
                    .entry(rule.alert_name().to_string())
                    .or_default()
                    .push(item.clone());
                collection.id_rules.insert(id, item);
            }
        }
        collection
    }

    /// Rules matching `key`, interpreted as an id or a name.
    pub fn find(&self, lookup: RuleLookupKey, key: &str) -> Vec<&ResourceRuleItem> {
        match lookup {
            RuleLookupKey::Id => self.id_rules.get(key).into_iter().collect(),
            RuleLookupKey::Name => self
                .name_rules
                .get(key)
                .map(|items| items.iter().collect())
                .unwrap_or_default(),
        }
    }
}

/// Picks the rule with the smallest id among all resources.
pub fn find_rule<'a>(
    resources: &'a BTreeMap<String, ResourceRuleCollection>,
    lookup: RuleLookupKey,
    key: &str,
) -> Option<&'a ResourceRuleItem> {
    resources
        .values()
        .flat_map(|c| c.find(lookup, key))
        .min_by(|a, b| a.id.cmp(&b.id))
}

#[derive(Debug)]
struct ResourceEntry {
    labels: BTreeMap<String, String>,
    rules: ResourceRuleCollection,
}

type ObjectKey = (String, String);

#[derive(Debug)]
pub struct RuleCache {
    namespaces: RwLock<HashMap<String, HashMap<String, ResourceEntry>>>,
    // objects announced since the last relist started
    relist: Mutex<Option<HashSet<ObjectKey>>>,
    synced: watch::Sender<bool>,
}

impl Default for RuleCache {
    fn default() -> Self {
        Self {
            namespaces: RwLock::default(),
            relist: Mutex::default(),
            synced: watch::Sender::new(false),
        }
    }
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the first full list of resources has been indexed.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub async fn wait_until_synced(&self) {
        // the sender lives as long as `self`, so waiting cannot fail
        let _ = self.synced.subscribe().wait_for(|synced| *synced).await;
    }

    pub async fn apply(&self, resource: &PrometheusRule) {
        let (Some(namespace), Some(name)) = (
            resource.metadata.namespace.as_deref(),
            resource.metadata.name.as_deref(),
        ) else {
            warn!("ignoring rule resource without namespace or name");
            return;
        };

        let entry = ResourceEntry {
            labels: resource.metadata.labels.clone().unwrap_or_default(),
            rules: ResourceRuleCollection::build(name, resource),
        };
        debug!(namespace, name, rules = entry.rules.id_rules.len(), "indexed rule resource");

        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), entry);
    }

    pub async fn delete(&self, resource: &PrometheusRule) {
        let (Some(namespace), Some(name)) = (
            resource.metadata.namespace.as_deref(),
            resource.metadata.name.as_deref(),
        ) else {
            return;
        };
        self.remove(namespace, name).await;
    }

    async fn remove(&self, namespace: &str, name: &str) {
        let mut namespaces = self.namespaces.write().await;
        if let Some(resources) = namespaces.get_mut(namespace) {
            resources.remove(name);
            if resources.is_empty() {
                namespaces.remove(namespace);
            }
        }
        debug!(namespace, name, "dropped rule resource from index");
    }

    pub async fn handle_event(&self, event: watcher::Event<PrometheusRule>) {
        match event {
            watcher::Event::Apply(resource) => self.apply(&resource).await,
            watcher::Event::Delete(resource) => self.delete(&resource).await,
            watcher::Event::Init => {
                *self.relist.lock().await = Some(HashSet::new());
            }
            watcher::Event::InitApply(resource) => {
                if let (Some(namespace), Some(name)) =
                    (resource.metadata.namespace.clone(), resource.metadata.name.clone())
                    && let Some(seen) = self.relist.lock().await.as_mut()
                {
                    seen.insert((namespace, name));
                }
                self.apply(&resource).await;
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relist.lock().await.take() else {
                    return;
                };
                let stale: Vec<ObjectKey> = self
                    .namespaces
                    .read()
                    .await
                    .iter()
                    .flat_map(|(ns, resources)| {
                        resources.keys().map(move |name| (ns.clone(), name.clone()))
                    })
                    .filter(|key| !seen.contains(key))
                    .collect();
                for (namespace, name) in stale {
                    self.remove(&namespace, &name).await;
                }
                self.synced.send_replace(true);
            }
        }
    }

    /// Copies of the indexed resources in `namespace` that `ruler` loads,
    /// keyed by resource name.
    pub async fn list_rules(
        &self,
        ruler: &dyn Ruler,
        namespace: &str,
        extra: &Selector,
    ) -> Result<BTreeMap<String, ResourceRuleCollection>, ruler::Error> {
        if !ruler.selects_namespace(namespace).await? {
            return Ok(BTreeMap::new());
        }
        let selector = ruler.rule_selector()?.and(extra);
        if selector.is_nothing() {
            return Ok(BTreeMap::new());
        }

        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(_, entry)| selector.matches(&entry.labels))
                    .map(|(name, entry)| (name.clone(), entry.rules.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Looks a rule up by id or name, as the ruler dictates.
    pub async fn get_rule(
        &self,
        ruler: &dyn Ruler,
        namespace: &str,
        extra: &Selector,
        key: &str,
    ) -> Result<Option<ResourceRuleItem>, ruler::Error> {
        let resources = self.list_rules(ruler, namespace, extra).await?;
        Ok(find_rule(&resources, ruler.lookup_key(), key).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rules::ruler::{PrometheusRuler, ThanosRuler};
    use crate::tests::{
        MONITORING_NAMESPACE, MemoryStore, THANOS_RULE_RESOURCE_LABELS, alert_rule,
        prometheus_resource, rule_group, rule_resource, thanos_ruler_resource,
    };
    use std::sync::Arc;

    fn thanos(store: Arc<MemoryStore>) -> ThanosRuler {
        ThanosRuler::new(
            thanos_ruler_resource(),
            store,
            Default::default(),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn test_apply_indexes_alerting_rules_only() {
        let cache = RuleCache::new();
        let mut recording = alert_rule("ignored", "up");
        recording.alert = None;
        recording.record = Some("job:up:sum".to_string());
        let resource = rule_resource(
            "test",
            "custom-alerting-rule-a",
            &THANOS_RULE_RESOURCE_LABELS,
            vec![rule_group(
                "g",
                vec![alert_rule("a", "up == 0"), alert_rule("a", "up == 0"), recording],
            )],
        );
        cache.apply(&resource).await;

        let ruler = thanos(Arc::new(MemoryStore::new()));
        let rules = cache.list_rules(&ruler, "test", &Selector::everything()).await.unwrap();
        let collection = &rules["custom-alerting-rule-a"];
        assert_eq!(collection.id_rules.len(), 1);
        assert_eq!(collection.name_rules["a"].len(), 1);
        assert!(collection.group_set.contains("g"));
    }

    #[tokio::test]
    async fn test_list_respects_selectors_and_scope() {
        let cache = RuleCache::new();
        cache
            .apply(&rule_resource(
                "test",
                "selected",
                &THANOS_RULE_RESOURCE_LABELS,
                vec![rule_group("g", vec![alert_rule("a", "up")])],
            ))
            .await;
        cache
            .apply(&rule_resource(
                "test",
                "unlabeled",
                &[],
                vec![rule_group("g", vec![alert_rule("b", "up")])],
            ))
            .await;

        let ruler = thanos(Arc::new(MemoryStore::new()));
        let rules = cache.list_rules(&ruler, "test", &Selector::everything()).await.unwrap();
        assert_eq!(rules.keys().collect::<Vec<_>>(), vec!["selected"]);

        let rules = cache
            .list_rules(&ruler, "test", &Selector::nothing())
            .await
            .unwrap();
        assert!(rules.is_empty());

        // Prometheus only loads resources from its own namespace
        let prometheus = PrometheusRuler::new(prometheus_resource(), Arc::new(MemoryStore::new()));
        let rules = cache
            .list_rules(&prometheus, "test", &Selector::everything())
            .await
            .unwrap();
        assert!(rules.is_empty());
        assert!(prometheus.selects_namespace(MONITORING_NAMESPACE).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_rule_by_name_and_id() {
        let cache = RuleCache::new();
        cache
            .apply(&rule_resource(
                "test",
                "r1",
                &THANOS_RULE_RESOURCE_LABELS,
                vec![rule_group("g", vec![alert_rule("a", "up == 0")])],
            ))
            .await;
        cache
            .apply(&rule_resource(
                "test",
                "r2",
                &THANOS_RULE_RESOURCE_LABELS,
                vec![rule_group("g", vec![alert_rule("a", "up == 1")])],
            ))
            .await;

        let ruler = thanos(Arc::new(MemoryStore::new()));
        let item = cache
            .get_rule(&ruler, "test", &Selector::everything(), "a")
            .await
            .unwrap()
            .unwrap();
        let rules = cache.list_rules(&ruler, "test", &Selector::everything()).await.unwrap();
        let smallest = rules
            .values()
            .flat_map(|c| c.id_rules.keys())
            .min()
            .unwrap();
        assert_eq!(&item.id, smallest);

        assert!(find_rule(&rules, RuleLookupKey::Id, &item.id).is_some());
        assert!(find_rule(&rules, RuleLookupKey::Id, "a").is_none());
        assert!(
            cache
                .get_rule(&ruler, "test", &Selector::everything(), "missing")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_relist_prunes_unannounced_resources() {
        let cache = RuleCache::new();
        let keep = rule_resource(
            "test",
            "keep",
            &THANOS_RULE_RESOURCE_LABELS,
            vec![rule_group("g", vec![alert_rule("a", "up")])],
        );
        let gone = rule_resource(
            "test",
            "gone",
            &THANOS_RULE_RESOURCE_LABELS,
            vec![rule_group("g", vec![alert_rule("b", "up")])],
        );
        cache.handle_event(watcher::Event::Apply(keep.clone())).await;
        cache.handle_event(watcher::Event::Apply(gone.clone())).await;

        assert!(!cache.is_synced());
        cache.handle_event(watcher::Event::Init).await;
        cache.handle_event(watcher::Event::InitApply(keep)).await;
        assert!(!cache.is_synced());
        cache.handle_event(watcher::Event::InitDone).await;
        assert!(cache.is_synced());

        let ruler = thanos(Arc::new(MemoryStore::new()));
        let rules = cache.list_rules(&ruler, "test", &Selector::everything()).await.unwrap();
        assert_eq!(rules.keys().collect::<Vec<_>>(), vec!["keep"]);

        cache.handle_event(watcher::Event::Delete(gone)).await;
        cache
            .handle_event(watcher::Event::Delete(rules_resource_named("keep")))
            .await;
        let rules = cache.list_rules(&ruler, "test", &Selector::everything()).await.unwrap();
        assert!(rules.is_empty());
    }

    fn rules_resource_named(name: &str) -> PrometheusRule {
        rule_resource("test", name, &[], Vec::new())
    }
}
