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


//! Rule engines and the resources they evaluate.
//!
//! A [`Ruler`] knows which PrometheusRule resources its engine loads. The
//! Prometheus engine is read-only here; the Thanos Ruler engine also owns
//! custom rules and packs them into as few resources as the size ceiling
//! allows.

use crate::rules::resource;
use crate::rules::retry::RetryConfig;
use crate::rules::selector::{self, Selector};
use crate::rules::store::{ResourceStore, StoreError};
use crate::types;
use crate::types::v1::prometheus::Prometheus as PrometheusResource;
use crate::types::v1::prometheus_rule::{PrometheusRule, PrometheusRuleSpec, Rule, RuleGroup};
use crate::types::v1::thanos_ruler::ThanosRuler as ThanosRulerResource;
use async_trait::async_trait;
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Prefix of generated names for resources holding custom rules.
pub const CUSTOM_RULE_RESOURCE_PREFIX: &str = "custom-alerting-rule-";

/// Ceiling on the serialized rule groups of one resource: 45% of 1 MiB,
/// leaving headroom under the API server object size limit.
pub const DEFAULT_MAX_RESOURCE_SIZE: usize = 1024 * 1024 * 45 / 100;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("the {ruler} ruler does not support {operation}"))]
    NotSupported {
        ruler: &'static str,
        operation: &'static str,
    },

    #[snafu(display("alerting rule {name} not found"))]
    RuleNotFound { name: String },

    #[snafu(display("alerting rule {name} needs {size} bytes, over the {limit} byte resource limit"))]
    RuleTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },

    #[snafu(display("invalid rule selector: {source}"))]
    InvalidSelector { source: selector::Error },

    #[snafu(transparent)]
    Store { source: StoreError },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store { source } if source.is_conflict())
    }
}

/// How rules from the cache are looked up for this engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleLookupKey {
    Id,
    Name,
}

#[derive(Clone, Copy, Debug)]
pub struct RulerOptions {
    pub max_resource_size: usize,
    pub retry: RetryConfig,
}

impl Default for RulerOptions {
    fn default() -> Self {
        Self {
            max_resource_size: DEFAULT_MAX_RESOURCE_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

/// One async mutex per resource, serialising writers in this process.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub async fn lock_for(&self, namespace: &str, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .clone()
    }

    pub async fn forget(&self, namespace: &str, name: &str) {
        self.locks
            .lock()
            .await
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
pub trait Ruler: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Namespace the engine's own resource lives in.
    fn namespace(&self) -> &str;

    fn lookup_key(&self) -> RuleLookupKey;

    /// Labels the engine attaches to every rule it reports.
    fn external_labels(&self) -> BTreeMap<String, String>;

    /// `None` means only the engine's own namespace is considered.
    fn rule_namespace_selector(&self) -> Result<Option<Selector>, Error>;

    fn rule_selector(&self) -> Result<Selector, Error>;

    fn store(&self) -> &dyn ResourceStore;

    async fn selects_namespace(&self, namespace: &str) -> Result<bool, Error> {
        match self.rule_namespace_selector()? {
            None => Ok(namespace == self.namespace()),
            Some(selector) => match self.store().namespace_labels(namespace).await {
                Ok(labels) => Ok(selector.matches(&labels)),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Resources in `namespace` this engine evaluates, narrowed by `extra`.
    async fn list_rule_resources(
        &self,
        namespace: &str,
        extra: &Selector,
    ) -> Result<Vec<PrometheusRule>, Error> {
        if !self.selects_namespace(namespace).await? {
            return Ok(Vec::new());
        }
        let selector = self.rule_selector()?.and(extra);
        if selector.is_nothing() {
            return Ok(Vec::new());
        }
        Ok(self.store().list_rule_resources(namespace, &selector).await?)
    }

    async fn add_alerting_rule(
        &self,
        namespace: &str,
        extra: &Selector,
        group: &str,
        rule: &Rule,
        resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    async fn update_alerting_rule(
        &self,
        namespace: &str,
        extra: &Selector,
        group: &str,
        rule: &Rule,
        resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    async fn delete_alerting_rule(
        &self,
        namespace: &str,
        extra: &Selector,
        name: &str,
    ) -> Result<(), Error>;
}

/// Prometheus evaluates the builtin rules; they are never written here.
pub struct PrometheusRuler {
    resource: PrometheusResource,
    store: Arc<dyn ResourceStore>,
}

impl PrometheusRuler {
    pub fn new(resource: PrometheusResource, store: Arc<dyn ResourceStore>) -> Self {
        Self { resource, store }
    }
}

#[async_trait]
impl Ruler for PrometheusRuler {
    fn kind(&self) -> &'static str {
        "prometheus"
    }

    fn namespace(&self) -> &str {
        self.resource.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn lookup_key(&self) -> RuleLookupKey {
        RuleLookupKey::Id
    }

    fn external_labels(&self) -> BTreeMap<String, String> {
        // Prometheus does not report external labels on its rules
        BTreeMap::new()
    }

    fn rule_namespace_selector(&self) -> Result<Option<Selector>, Error> {
        namespace_selector(self.resource.spec.rule_namespace_selector.as_ref())
    }

    fn rule_selector(&self) -> Result<Selector, Error> {
        Selector::from_label_selector(self.resource.spec.rule_selector.as_ref())
            .context(InvalidSelectorSnafu)
    }

    fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    async fn add_alerting_rule(
        &self,
        _namespace: &str,
        _extra: &Selector,
        _group: &str,
        _rule: &Rule,
        _resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        NotSupportedSnafu {
            ruler: self.kind(),
            operation: "adding rules",
        }
        .fail()
    }

    async fn update_alerting_rule(
        &self,
        _namespace: &str,
        _extra: &Selector,
        _group: &str,
        _rule: &Rule,
        _resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        NotSupportedSnafu {
            ruler: self.kind(),
            operation: "updating rules",
        }
        .fail()
    }

    async fn delete_alerting_rule(
        &self,
        _namespace: &str,
        _extra: &Selector,
        _name: &str,
    ) -> Result<(), Error> {
        NotSupportedSnafu {
            ruler: self.kind(),
            operation: "deleting rules",
        }
        .fail()
    }
}

fn namespace_selector(
    selector: Option<&k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector>,
) -> Result<Option<Selector>, Error> {
    selector
        .map(|s| Selector::from_label_selector(Some(s)))
        .transpose()
        .context(InvalidSelectorSnafu)
}

/// Result of one guarded read-modify-write on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    Unchanged,
    /// The edit would push the resource over the size ceiling.
    Full,
    /// The resource disappeared before it could be edited.
    Vanished,
}

/// Thanos Ruler evaluates the custom rules managed through this service.
pub struct ThanosRuler {
    resource: ThanosRulerResource,
    store: Arc<dyn ResourceStore>,
    locks: Arc<ResourceLocks>,
    options: RulerOptions,
}

impl ThanosRuler {
    pub fn new(
        resource: ThanosRulerResource,
        store: Arc<dyn ResourceStore>,
        locks: Arc<ResourceLocks>,
        options: RulerOptions,
    ) -> Self {
        Self {
            resource,
            store,
            locks,
            options,
        }
    }

    /// Applies `edit` to the latest copy of a resource and writes it back,
    /// retrying from a fresh read when the write loses a race.
    ///
    /// `edit` returns whether it changed anything. A resource whose groups
    /// end up empty is deleted.
    async fn edit_resource<F>(&self, namespace: &str, name: &str, edit: F) -> Result<Outcome, Error>
    where
        F: Fn(&mut PrometheusRuleSpec) -> bool + Send + Sync,
    {
        let lock = self.locks.lock_for(namespace, name).await;
        let _guard = lock.lock().await;

        let mut backoff = self.options.retry.backoff();
        loop {
            match self.try_edit_resource(namespace, name, &edit).await {
                Err(e) if e.is_conflict() => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!(namespace, name, ?delay, "resource changed underneath, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(namespace, name, "giving up after repeated conflicts");
                        return Err(e);
                    }
                },
                other => return other,
            }
        }
    }

    async fn try_edit_resource<F>(
        &self,
        namespace: &str,
        name: &str,
        edit: &F,
    ) -> Result<Outcome, Error>
    where
        F: Fn(&mut PrometheusRuleSpec) -> bool + Send + Sync,
    {
        let mut latest = match self.store.get_rule_resource(namespace, name).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => return Ok(Outcome::Vanished),
            Err(e) => return Err(e.into()),
        };
        let before = latest.spec_size()?;
        if !edit(&mut latest.spec) {
            return Ok(Outcome::Unchanged);
        }

        if latest.spec.groups.is_empty() {
            let version = latest.metadata.resource_version.as_deref();
            return match self.store.delete_rule_resource(namespace, name, version).await {
                Ok(()) => {
                    info!(namespace, name, "deleted rule resource with no groups left");
                    self.locks.forget(namespace, name).await;
                    Ok(Outcome::Committed)
                }
                Err(e) if e.is_not_found() => Ok(Outcome::Vanished),
                Err(e) => Err(e.into()),
            };
        }

        // The ceiling only stops growth, so oversized resources can still shrink.
        let after = latest.spec_size()?;
        if after > before && after >= self.options.max_resource_size {
            return Ok(Outcome::Full);
        }
        match self.store.replace_rule_resource(namespace, &latest).await {
            Ok(_) => Ok(Outcome::Committed),
            Err(e) if e.is_not_found() => Ok(Outcome::Vanished),
            Err(e) => Err(e.into()),
        }
    }

    /// Puts `rule` into the smallest resource with room for it, skipping
    /// `exclude`, or into a new resource when none has room.
    async fn add_to_resources(
        &self,
        namespace: &str,
        resources: &[PrometheusRule],
        exclude: &HashSet<String>,
        group: &str,
        rule: &Rule,
        resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let mut candidates = Vec::with_capacity(resources.len());
        for resource in resources {
            let name = resource.name_any();
            if !exclude.contains(&name) {
                candidates.push((resource.spec_size()?, name));
            }
        }
        candidates.sort();

        for (_, name) in &candidates {
            let outcome = self
                .edit_resource(namespace, name, |spec| {
                    resource::add_rule(spec, group, rule.clone());
                    true
                })
                .await?;
            match outcome {
                Outcome::Committed => {
                    info!(namespace, resource = %name, rule = rule.alert_name(), "added alerting rule");
                    return Ok(());
                }
                Outcome::Full => debug!(namespace, resource = %name, "rule resource is full"),
                Outcome::Unchanged | Outcome::Vanished => {}
            }
        }

        let mut created = PrometheusRule::new(
            "",
            PrometheusRuleSpec {
                groups: vec![RuleGroup {
                    name: group.to_string(),
                    rules: vec![rule.clone()],
                    ..Default::default()
                }],
            },
        );
        created.metadata.name = None;
        created.metadata.generate_name = Some(CUSTOM_RULE_RESOURCE_PREFIX.to_string());
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.labels = Some(resource_labels.clone());

        let size = created.spec_size()?;
        if size >= self.options.max_resource_size {
            return RuleTooLargeSnafu {
                name: rule.alert_name(),
                size,
                limit: self.options.max_resource_size,
            }
            .fail();
        }

        let created = self.store.create_rule_resource(namespace, &created).await?;
        info!(
            namespace,
            resource = %created.name_any(),
            rule = rule.alert_name(),
            "created rule resource for alerting rule"
        );
        Ok(())
    }

    async fn remove_from_resource(&self, namespace: &str, name: &str, rule: &str) -> Result<bool, Error> {
        let outcome = self
            .edit_resource(namespace, name, |spec| resource::remove_rule(spec, rule))
            .await?;
        Ok(outcome == Outcome::Committed)
    }
}

#[async_trait]
impl Ruler for ThanosRuler {
    fn kind(&self) -> &'static str {
        "thanos"
    }

    fn namespace(&self) -> &str {
        self.resource.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn lookup_key(&self) -> RuleLookupKey {
        RuleLookupKey::Name
    }

    fn external_labels(&self) -> BTreeMap<String, String> {
        self.resource.spec.labels.clone().unwrap_or_default()
    }

    fn rule_namespace_selector(&self) -> Result<Option<Selector>, Error> {
        namespace_selector(self.resource.spec.rule_namespace_selector.as_ref())
    }

    fn rule_selector(&self) -> Result<Selector, Error> {
        Selector::from_label_selector(self.resource.spec.rule_selector.as_ref())
            .context(InvalidSelectorSnafu)
    }

    fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    async fn add_alerting_rule(
        &self,
        namespace: &str,
        extra: &Selector,
        group: &str,
        rule: &Rule,
        resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let resources = self.list_rule_resources(namespace, extra).await?;
        self.add_to_resources(namespace, &resources, &HashSet::new(), group, rule, resource_labels)
            .await
    }

    async fn update_alerting_rule(
        &self,
        namespace: &str,
        extra: &Selector,
        group: &str,
        rule: &Rule,
        resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let name = rule.alert_name();
        let resources = self.list_rule_resources(namespace, extra).await?;

        let mut found = false;
        let mut updated = false;
        let mut overflowed = HashSet::new();
        for resource in &resources {
            let resource_name = resource.name_any();
            if updated {
                if self.remove_from_resource(namespace, &resource_name, name).await? {
                    info!(namespace, resource = %resource_name, rule = name, "removed duplicate alerting rule");
                }
                continue;
            }
            let outcome = self
                .edit_resource(namespace, &resource_name, |spec| {
                    resource::update_rule(spec, group, rule.clone())
                })
                .await?;
            match outcome {
                Outcome::Committed => {
                    found = true;
                    updated = true;
                    info!(namespace, resource = %resource_name, rule = name, "updated alerting rule");
                }
                Outcome::Full => {
                    found = true;
                    overflowed.insert(resource_name);
                }
                Outcome::Unchanged | Outcome::Vanished => {}
            }
        }

        if !found {
            return RuleNotFoundSnafu { name }.fail();
        }
        if !updated {
            self.add_to_resources(namespace, &resources, &overflowed, group, rule, resource_labels)
                .await?;
        }
        // only after the new copy is stored, so the rule never disappears
        for resource_name in &overflowed {
            self.remove_from_resource(namespace, resource_name, name).await?;
        }
        Ok(())
    }

    async fn delete_alerting_rule(
        &self,
        namespace: &str,
        extra: &Selector,
        name: &str,
    ) -> Result<(), Error> {
        let resources = self.list_rule_resources(namespace, extra).await?;
        let mut deleted = false;
        for resource in &resources {
            let resource_name = resource.name_any();
            if self.remove_from_resource(namespace, &resource_name, name).await? {
                info!(namespace, resource = %resource_name, rule = name, "deleted alerting rule");
                deleted = true;
            }
        }
        if deleted {
            Ok(())
        } else {
            RuleNotFoundSnafu { name }.fail()
        }
    }
}
