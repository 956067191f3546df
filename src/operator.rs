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

//! Alerting rule operations behind the HTTP API.
//!
//! Custom rules are stored in resources loaded by Thanos Ruler and keyed by
//! name. Builtin rules come from resources loaded by Prometheus, or straight
//! from its rules endpoint when no Prometheus resource is known, and are
//! keyed by id.

use crate::client::{self, RuleSource};
use crate::rules::cache::{self, RuleCache};
use crate::rules::file::RuleFileNaming;
use crate::rules::promql;
use crate::rules::registry::RulerRegistry;
use crate::rules::ruler::{self, Ruler};
use crate::rules::selector::{Requirement, Selector};
use crate::rules::status::{self, RuleChunk};
use crate::types::v2alpha1::bulk::{BulkErrorType, BulkItemResponse, BulkResponse, BulkResult};
use crate::types::v2alpha1::query::{AlertQueryParams, AlertingRuleQueryParams};
use crate::types::v2alpha1::rule::{
    AlertList, GettableAlertingRule, GettableAlertingRuleList, LABEL_KEY_RULE_LEVEL,
    PostableAlertingRule, RuleLevel, ValidationError,
};
use chrono::Utc;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_RULES_NAMESPACE: &str = "kubesphere-monitoring-system";

pub const DEFAULT_CUSTOM_RULE_GROUP: &str = "alerting.custom.defaults";

const NAMESPACE_LABEL: &str = "namespace";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{engine} is not enabled"))]
    EngineNotEnabled { engine: &'static str },

    #[snafu(display("alerting rule {name} not found"))]
    NotFound { name: String },

    #[snafu(display("alerting rule {name} already exists"))]
    AlreadyExists { name: String },

    #[snafu(display("rule name {body_name} does not match {name} in the path"))]
    NameMismatch { name: String, body_name: String },

    #[snafu(display("invalid alerting rule: {source}"))]
    InvalidRule { source: ValidationError },

    #[snafu(display("failed to scope query to namespace {namespace}: {source}"))]
    InvalidQuery {
        namespace: String,
        source: promql::Error,
    },

    #[snafu(display("failed to query {engine} rules: {source}"))]
    Query {
        engine: &'static str,
        source: client::Error,
    },

    #[snafu(transparent)]
    Ruler { source: ruler::Error },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::Conflict,
            Error::NameMismatch { .. } | Error::InvalidRule { .. } | Error::InvalidQuery { .. } => {
                ErrorKind::BadRequest
            }
            Error::Ruler { source } => match source {
                ruler::Error::RuleNotFound { .. } => ErrorKind::NotFound,
                ruler::Error::RuleTooLarge { .. } => ErrorKind::BadRequest,
                e if e.is_conflict() => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            Error::EngineNotEnabled { .. } | Error::Query { .. } => ErrorKind::Internal,
        }
    }

    fn bulk_error_type(&self) -> BulkErrorType {
        match self.kind() {
            ErrorKind::BadRequest => BulkErrorType::BadData,
            ErrorKind::NotFound => BulkErrorType::NotFound,
            ErrorKind::Conflict | ErrorKind::Internal => BulkErrorType::ServerError,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug)]
pub struct OperatorOptions {
    /// Namespace holding cluster level custom rules and builtin rules.
    pub rules_namespace: String,
    pub custom_rule_group: String,
    /// Labels put on resources created for custom rules. They must satisfy
    /// the Thanos Ruler rule selector.
    pub custom_rule_resource_labels: BTreeMap<String, String>,
}

impl Default for OperatorOptions {
    fn default() -> Self {
        Self {
            rules_namespace: DEFAULT_RULES_NAMESPACE.to_string(),
            custom_rule_group: DEFAULT_CUSTOM_RULE_GROUP.to_string(),
            custom_rule_resource_labels: BTreeMap::new(),
        }
    }
}

pub struct Operator {
    cache: Arc<RuleCache>,
    rulers: Arc<RulerRegistry>,
    prometheus: Arc<dyn RuleSource>,
    thanos: Option<Arc<dyn RuleSource>>,
    naming: Arc<dyn RuleFileNaming>,
    options: OperatorOptions,
}

// Where the custom rules of a request namespace live.
struct Scope {
    namespace: String,
    level: RuleLevel,
    extra: Selector,
}

impl Operator {
    pub fn new(
        cache: Arc<RuleCache>,
        rulers: Arc<RulerRegistry>,
        prometheus: Arc<dyn RuleSource>,
        thanos: Option<Arc<dyn RuleSource>>,
        naming: Arc<dyn RuleFileNaming>,
        options: OperatorOptions,
    ) -> Self {
        Self {
            cache,
            rulers,
            prometheus,
            thanos,
            naming,
            options,
        }
    }

    /// Waits until the rule cache and the engine registry have each seen a
    /// full list, so reads and existence checks see stored rules.
    pub async fn wait_until_synced(&self) {
        self.cache.wait_until_synced().await;
        self.rulers.wait_until_synced().await;
    }

    pub async fn list_custom_alerting_rules(
        &self,
        namespace: &str,
        query: &AlertingRuleQueryParams,
    ) -> Result<GettableAlertingRuleList> {
        let rules = self.custom_rules_status(namespace).await?;
        let mut rules = query.filter(rules);
        query.sort(&mut rules);
        Ok(GettableAlertingRuleList {
            total: rules.len(),
            items: query.sub(&rules),
        })
    }

    pub async fn list_custom_rules_alerts(
        &self,
        namespace: &str,
        query: &AlertQueryParams,
    ) -> Result<AlertList> {
        let rules = self.custom_rules_status(namespace).await?;
        Ok(page_alerts(rules, query))
    }

    pub async fn get_custom_alerting_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<GettableAlertingRule> {
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);
        let resources = self
            .cache
            .list_rules(ruler.as_ref(), &scope.namespace, &scope.extra)
            .await?;
        let item = cache::find_rule(&resources, ruler.lookup_key(), name)
            .context(NotFoundSnafu { name })?;
        let live = self.thanos_live_rules().await?;

        let chunk = RuleChunk {
            namespace: &scope.namespace,
            level: scope.level,
            custom: true,
            resources: &resources,
        };
        Ok(status::get_alerting_rule_status(
            &chunk,
            item,
            &live,
            &ruler.external_labels(),
            self.naming.as_ref(),
        ))
    }

    pub async fn list_custom_specified_rule_alerts(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<AlertList> {
        let rule = self.get_custom_alerting_rule(namespace, name).await?;
        Ok(AlertList {
            total: rule.alerts.len(),
            items: rule.alerts,
        })
    }

    pub async fn create_custom_alerting_rule(
        &self,
        namespace: &str,
        rule: PostableAlertingRule,
    ) -> Result<()> {
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);
        self.create_rule(ruler.as_ref(), &scope, rule).await
    }

    pub async fn update_custom_alerting_rule(
        &self,
        namespace: &str,
        name: &str,
        mut rule: PostableAlertingRule,
    ) -> Result<()> {
        if rule.name.is_empty() {
            rule.name = name.to_string();
        }
        ensure!(
            rule.name == name,
            NameMismatchSnafu {
                name,
                body_name: rule.name.clone(),
            }
        );
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);
        self.update_rule(ruler.as_ref(), &scope, rule).await
    }

    pub async fn delete_custom_alerting_rule(&self, namespace: &str, name: &str) -> Result<()> {
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);
        self.delete_rule(ruler.as_ref(), &scope, name).await
    }

    /// Creates the rules that do not exist yet and updates the others.
    pub async fn create_or_update_custom_alerting_rules(
        &self,
        namespace: &str,
        rules: Vec<PostableAlertingRule>,
    ) -> Result<BulkResponse> {
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);
        let resources = self
            .cache
            .list_rules(ruler.as_ref(), &scope.namespace, &scope.extra)
            .await?;

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(rules.len());
        for rule in rules {
            let name = rule.name.clone();
            if !seen.insert(name.clone()) {
                items.push(BulkItemResponse::error(
                    name,
                    BulkErrorType::DuplicateName,
                    "rule name is duplicated in the request",
                ));
                continue;
            }

            let exists = cache::find_rule(&resources, ruler.lookup_key(), &name).is_some();
            let outcome = if exists {
                self.update_rule(ruler.as_ref(), &scope, rule)
                    .await
                    .map(|_| BulkResult::Updated)
            } else {
                self.create_rule(ruler.as_ref(), &scope, rule)
                    .await
                    .map(|_| BulkResult::Created)
            };
            items.push(bulk_item(name, outcome));
        }
        Ok(BulkResponse::from_items(items))
    }

    pub async fn delete_custom_alerting_rules(
        &self,
        namespace: &str,
        names: Vec<String>,
    ) -> Result<BulkResponse> {
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);

        let mut items = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self
                .delete_rule(ruler.as_ref(), &scope, &name)
                .await
                .map(|_| BulkResult::Deleted);
            items.push(bulk_item(name, outcome));
        }
        Ok(BulkResponse::from_items(items))
    }

    pub async fn list_builtin_alerting_rules(
        &self,
        query: &AlertingRuleQueryParams,
    ) -> Result<GettableAlertingRuleList> {
        let rules = self.builtin_rules_status(None).await?;
        let mut rules = query.filter(rules);
        query.sort(&mut rules);
        Ok(GettableAlertingRuleList {
            total: rules.len(),
            items: query.sub(&rules),
        })
    }

    pub async fn list_builtin_rules_alerts(&self, query: &AlertQueryParams) -> Result<AlertList> {
        let rules = self.builtin_rules_status(None).await?;
        Ok(page_alerts(rules, query))
    }

    pub async fn get_builtin_alerting_rule(&self, id: &str) -> Result<GettableAlertingRule> {
        self.builtin_rules_status(Some(id))
            .await?
            .into_iter()
            .next()
            .context(NotFoundSnafu { name: id })
    }

    pub async fn list_builtin_specified_rule_alerts(&self, id: &str) -> Result<AlertList> {
        let rule = self.get_builtin_alerting_rule(id).await?;
        Ok(AlertList {
            total: rule.alerts.len(),
            items: rule.alerts,
        })
    }

    async fn create_rule(
        &self,
        ruler: &dyn Ruler,
        scope: &Scope,
        mut rule: PostableAlertingRule,
    ) -> Result<()> {
        rule.validate().context(InvalidRuleSnafu)?;
        let existing = self
            .cache
            .get_rule(ruler, &scope.namespace, &scope.extra, &rule.name)
            .await?;
        ensure!(existing.is_none(), AlreadyExistsSnafu { name: &rule.name });

        self.prepare(scope, &mut rule)?;
        ruler
            .add_alerting_rule(
                &scope.namespace,
                &scope.extra,
                &self.options.custom_rule_group,
                &rule.to_prometheus_rule(),
                &self.resource_labels(scope.level),
            )
            .await?;
        info!(namespace = %scope.namespace, level = %scope.level, rule = %rule.name, "created alerting rule");
        Ok(())
    }

    async fn update_rule(
        &self,
        ruler: &dyn Ruler,
        scope: &Scope,
        mut rule: PostableAlertingRule,
    ) -> Result<()> {
        rule.validate().context(InvalidRuleSnafu)?;
        let existing = self
            .cache
            .get_rule(ruler, &scope.namespace, &scope.extra, &rule.name)
            .await?
            .context(NotFoundSnafu { name: &rule.name })?;

        self.prepare(scope, &mut rule)?;
        ruler
            .update_alerting_rule(
                &scope.namespace,
                &scope.extra,
                &existing.group,
                &rule.to_prometheus_rule(),
                &self.resource_labels(scope.level),
            )
            .await?;
        info!(namespace = %scope.namespace, level = %scope.level, rule = %rule.name, "updated alerting rule");
        Ok(())
    }

    async fn delete_rule(&self, ruler: &dyn Ruler, scope: &Scope, name: &str) -> Result<()> {
        self.cache
            .get_rule(ruler, &scope.namespace, &scope.extra, name)
            .await?
            .context(NotFoundSnafu { name })?;
        ruler
            .delete_alerting_rule(&scope.namespace, &scope.extra, name)
            .await?;
        info!(namespace = %scope.namespace, level = %scope.level, rule = %name, "deleted alerting rule");
        Ok(())
    }

    async fn custom_rules_status(&self, namespace: &str) -> Result<Vec<GettableAlertingRule>> {
        let ruler = self.thanos_ruler().await?;
        let scope = self.scope(namespace);
        let resources = self
            .cache
            .list_rules(ruler.as_ref(), &scope.namespace, &scope.extra)
            .await?;
        let live = self.thanos_live_rules().await?;

        let chunk = RuleChunk {
            namespace: &scope.namespace,
            level: scope.level,
            custom: true,
            resources: &resources,
        };
        Ok(status::get_alerting_rules_status(
            &chunk,
            &live,
            &ruler.external_labels(),
            self.naming.as_ref(),
        ))
    }

    // Every builtin rule, or only the one with `id`.
    async fn builtin_rules_status(&self, id: Option<&str>) -> Result<Vec<GettableAlertingRule>> {
        let live = self
            .prometheus
            .alerting_rules(&[])
            .await
            .context(QuerySnafu {
                engine: "prometheus",
            })?;

        let Some(ruler) = self.rulers.prometheus_ruler().await else {
            return Ok(status::parse_alerting_rules(
                &live,
                &BTreeMap::new(),
                RuleLevel::Cluster,
                |_, rule_id, _| id.is_none_or(|id| id == rule_id),
            ));
        };

        let extra = Selector::from_requirement(Requirement::DoesNotExist(
            LABEL_KEY_RULE_LEVEL.to_string(),
        ));
        let namespace = &self.options.rules_namespace;
        let resources = self
            .cache
            .list_rules(ruler.as_ref(), namespace, &extra)
            .await?;
        let chunk = RuleChunk {
            namespace,
            level: RuleLevel::Cluster,
            custom: false,
            resources: &resources,
        };
        let external_labels = ruler.external_labels();

        match id {
            None => Ok(status::get_alerting_rules_status(
                &chunk,
                &live,
                &external_labels,
                self.naming.as_ref(),
            )),
            Some(id) => Ok(cache::find_rule(&resources, ruler.lookup_key(), id)
                .map(|item| {
                    status::get_alerting_rule_status(
                        &chunk,
                        item,
                        &live,
                        &external_labels,
                        self.naming.as_ref(),
                    )
                })
                .into_iter()
                .collect()),
        }
    }

    async fn thanos_ruler(&self) -> Result<Arc<dyn Ruler>> {
        self.rulers.thanos_ruler().await.context(EngineNotEnabledSnafu {
            engine: "thanos ruler",
        })
    }

    async fn thanos_live_rules(&self) -> Result<Vec<client::RuleGroup>> {
        let source = self.thanos.as_ref().context(EngineNotEnabledSnafu {
            engine: "thanos ruler",
        })?;
        source.alerting_rules(&[]).await.context(QuerySnafu {
            engine: "thanos ruler",
        })
    }

    // An empty namespace addresses cluster level rules.
    fn scope(&self, namespace: &str) -> Scope {
        let (namespace, level) = if namespace.is_empty() {
            (self.options.rules_namespace.clone(), RuleLevel::Cluster)
        } else {
            (namespace.to_string(), RuleLevel::Namespace)
        };
        Scope {
            namespace,
            level,
            extra: Selector::from_labels([(LABEL_KEY_RULE_LEVEL, level.to_string())]),
        }
    }

    fn prepare(&self, scope: &Scope, rule: &mut PostableAlertingRule) -> Result<()> {
        if scope.level == RuleLevel::Namespace {
            rule.query = promql::inject_label_matcher(&rule.query, NAMESPACE_LABEL, &scope.namespace)
                .context(InvalidQuerySnafu {
                    namespace: &scope.namespace,
                })?;
        }
        rule.set_update_time(Utc::now());
        Ok(())
    }

    fn resource_labels(&self, level: RuleLevel) -> BTreeMap<String, String> {
        let mut labels = self.options.custom_rule_resource_labels.clone();
        labels.insert(LABEL_KEY_RULE_LEVEL.to_string(), level.to_string());
        labels
    }
}

fn bulk_item(name: String, outcome: Result<BulkResult>) -> BulkItemResponse {
    match outcome {
        Ok(result) => BulkItemResponse::success(name, result),
        Err(e) => {
            warn!(rule = %name, error = %e, "bulk operation failed");
            BulkItemResponse::error(name, e.bulk_error_type(), e)
        }
    }
}

fn page_alerts(rules: Vec<GettableAlertingRule>, query: &AlertQueryParams) -> AlertList {
    let alerts = rules.into_iter().flat_map(|r| r.alerts).collect();
    let mut alerts = query.filter(alerts);
    query.sort(&mut alerts);
    AlertList {
        total: alerts.len(),
        items: query.sub(&alerts),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rules::file::OperatorRuleFileNaming;
    use crate::rules::fingerprint::gen_resource_rule_id;
    use crate::rules::ruler::RulerOptions;
    use crate::tests::{
        MONITORING_NAMESPACE, MemoryStore, PROMETHEUS_RULE_RESOURCE_LABELS, StaticRuleSource,
        THANOS_RULE_RESOURCE_LABELS, alert_rule, prometheus_resource, rule_group, rule_resource,
        thanos_ruler_resource,
    };
    use crate::types::v2alpha1::bulk::BulkStatus;
    use crate::types::v2alpha1::rule::{RuleHealth, RuleState};

    struct Harness {
        operator: Operator,
        store: Arc<MemoryStore>,
        rulers: Arc<RulerRegistry>,
        prometheus: Arc<StaticRuleSource>,
        thanos: Arc<StaticRuleSource>,
    }

    async fn harness() -> Harness {
        let cache = Arc::new(RuleCache::new());
        let store = Arc::new(MemoryStore::with_cache(cache.clone()));
        let rulers = Arc::new(RulerRegistry::new(
            store.clone(),
            RulerOptions::default(),
            None,
            None,
        ));
        rulers.set_thanos_ruler(thanos_ruler_resource()).await;

        let prometheus = Arc::new(StaticRuleSource::default());
        let thanos = Arc::new(StaticRuleSource::default());
        let options = OperatorOptions {
            custom_rule_resource_labels: THANOS_RULE_RESOURCE_LABELS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        let operator = Operator::new(
            cache,
            rulers.clone(),
            prometheus.clone(),
            Some(thanos.clone()),
            Arc::new(OperatorRuleFileNaming),
            options,
        );

        Harness {
            operator,
            store,
            rulers,
            prometheus,
            thanos,
        }
    }

    fn postable(name: &str, query: &str) -> PostableAlertingRule {
        PostableAlertingRule {
            name: name.to_string(),
            query: query.to_string(),
            duration: "1m".to_string(),
            labels: BTreeMap::from([("severity".to_string(), "warning".to_string())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_namespace_rule_then_get() {
        let h = harness().await;
        h.operator
            .create_custom_alerting_rule("test", postable("cpu-high", "cpu_usage > 1"))
            .await
            .unwrap();

        let rule = h
            .operator
            .get_custom_alerting_rule("test", "cpu-high")
            .await
            .unwrap();
        assert_eq!(rule.rule.name, "cpu-high");
        assert_eq!(rule.state, RuleState::Inactive);
        assert_eq!(rule.health, RuleHealth::Unknown);
        assert_eq!(rule.level, Some(RuleLevel::Namespace));
        assert!(rule.rule.query.contains(r#"namespace="test""#), "{}", rule.rule.query);
        assert!(rule.update_time().is_some());

        let resources = h.store.resources("test").await;
        assert_eq!(resources.len(), 1);
        let labels = resources[0].metadata.labels.clone().unwrap();
        assert_eq!(labels.get(LABEL_KEY_RULE_LEVEL).unwrap(), "namespace");
        assert_eq!(labels.get("role").unwrap(), "thanos-alerting-rules");
        assert_eq!(resources[0].spec.groups[0].name, DEFAULT_CUSTOM_RULE_GROUP);
    }

    #[tokio::test]
    async fn test_duplicate_create_and_delete() {
        let h = harness().await;
        let rule = postable("cpu-high", "cpu_usage > 1");
        h.operator
            .create_custom_alerting_rule("test", rule.clone())
            .await
            .unwrap();

        let err = h
            .operator
            .create_custom_alerting_rule("test", rule)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Conflict);

        h.operator
            .delete_custom_alerting_rule("test", "cpu-high")
            .await
            .unwrap();
        let err = h
            .operator
            .get_custom_alerting_rule("test", "cpu-high")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("not found"));
        assert!(h.store.resources("test").await.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_pages() {
        let h = harness().await;
        for name in ["cpu-high", "mem-high"] {
            h.operator
                .create_custom_alerting_rule("", postable(name, "up == 0"))
                .await
                .unwrap();
        }

        let query = AlertingRuleQueryParams {
            name_contain_filter: "cpu".to_string(),
            sort_field: "name".to_string(),
            sort_type: "desc".to_string(),
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let list = h
            .operator
            .list_custom_alerting_rules("", &query)
            .await
            .unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.items[0].rule.name, "cpu-high");
        assert_eq!(list.items[0].level, Some(RuleLevel::Cluster));

        let all = h
            .operator
            .list_custom_alerting_rules("", &Default::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);
    }

    #[tokio::test]
    async fn test_levels_do_not_see_each_other() {
        let h = harness().await;
        h.operator
            .create_custom_alerting_rule("", postable("cluster-rule", "up == 0"))
            .await
            .unwrap();
        h.operator
            .create_custom_alerting_rule(MONITORING_NAMESPACE, postable("ns-rule", "up == 0"))
            .await
            .unwrap();

        // both live in the monitoring namespace under different level labels
        assert_eq!(
            h.store.rule_names(MONITORING_NAMESPACE).await,
            vec!["cluster-rule", "ns-rule"]
        );

        let cluster = h
            .operator
            .list_custom_alerting_rules("", &Default::default())
            .await
            .unwrap();
        assert_eq!(cluster.total, 1);
        assert_eq!(cluster.items[0].rule.name, "cluster-rule");
        assert!(!cluster.items[0].rule.query.contains("namespace"));

        let err = h
            .operator
            .get_custom_alerting_rule(MONITORING_NAMESPACE, "cluster-rule")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_rule() {
        let h = harness().await;
        h.operator
            .create_custom_alerting_rule("test", postable("cpu-high", "cpu_usage > 1"))
            .await
            .unwrap();

        let mut changed = postable("", "cpu_usage > 2");
        changed.duration = "5m".to_string();
        h.operator
            .update_custom_alerting_rule("test", "cpu-high", changed)
            .await
            .unwrap();

        let rule = h
            .operator
            .get_custom_alerting_rule("test", "cpu-high")
            .await
            .unwrap();
        assert_eq!(rule.rule.duration, "5m");
        assert!(rule.rule.query.contains("> 2"), "{}", rule.rule.query);
        assert_eq!(h.store.rule_names("test").await, vec!["cpu-high"]);
    }

    #[tokio::test]
    async fn test_update_rejects_mismatch_and_missing() {
        let h = harness().await;

        let err = h
            .operator
            .update_custom_alerting_rule("test", "cpu-high", postable("mem-high", "up"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = h
            .operator
            .update_custom_alerting_rule("test", "cpu-high", postable("cpu-high", "up"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_rule() {
        let h = harness().await;
        let err = h
            .operator
            .create_custom_alerting_rule("test", postable("Bad_Name", "sum("))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(h.store.resources("test").await.is_empty());
    }

    #[tokio::test]
    async fn test_live_state_and_alerts_are_merged() {
        let h = harness().await;
        h.operator
            .create_custom_alerting_rule("test", postable("cpu-high", "cpu_usage > 1"))
            .await
            .unwrap();

        let resource = h.store.resources("test").await.remove(0);
        let stored = &resource.spec.groups[0].rules[0];
        let alert = client::Alert {
            labels: BTreeMap::from([("alertname".to_string(), "cpu-high".to_string())]),
            state: "firing".to_string(),
            value: "2".to_string(),
            ..Default::default()
        };
        h.thanos
            .set(vec![client::RuleGroup {
                name: DEFAULT_CUSTOM_RULE_GROUP.to_string(),
                file: format!(
                    "/etc/thanos/rules/thanos-ruler-rulefiles-0/test-{}.yaml",
                    resource.metadata.name.clone().unwrap()
                ),
                rules: vec![client::AlertingRule {
                    state: "firing".to_string(),
                    name: "cpu-high".to_string(),
                    query: stored.expr_string(),
                    duration: 60.0,
                    labels: stored.labels.clone(),
                    health: "ok".to_string(),
                    alerts: vec![alert],
                    ..Default::default()
                }],
            }])
            .await;

        let rule = h
            .operator
            .get_custom_alerting_rule("test", "cpu-high")
            .await
            .unwrap();
        assert_eq!(rule.state, RuleState::Firing);
        assert_eq!(rule.health, RuleHealth::Ok);

        let alerts = h
            .operator
            .list_custom_rules_alerts("test", &Default::default())
            .await
            .unwrap();
        assert_eq!(alerts.total, 1);
        assert_eq!(alerts.items[0].rule_name, "cpu-high");
        assert_eq!(alerts.items[0].rule_id, rule.rule.id);

        let specified = h
            .operator
            .list_custom_specified_rule_alerts("test", "cpu-high")
            .await
            .unwrap();
        assert_eq!(specified.items, alerts.items);
    }

    #[tokio::test]
    async fn test_bulk_create_or_update() {
        let h = harness().await;
        h.operator
            .create_custom_alerting_rule("test", postable("existing", "up == 0"))
            .await
            .unwrap();

        let resp = h
            .operator
            .create_or_update_custom_alerting_rules(
                "test",
                vec![
                    postable("fresh", "up == 0"),
                    postable("existing", "up == 1"),
                    postable("dup", "up == 0"),
                    postable("dup", "up == 2"),
                    postable("-bad", "up == 0"),
                ],
            )
            .await
            .unwrap();

        assert!(resp.errors);
        let by_name: BTreeMap<_, _> = resp
            .items
            .iter()
            .map(|i| (i.rule_name.as_str(), i))
            .collect();
        assert_eq!(by_name["fresh"].result, Some(BulkResult::Created));
        assert_eq!(by_name["existing"].result, Some(BulkResult::Updated));
        assert_eq!(by_name["dup"].error_type, Some(BulkErrorType::DuplicateName));
        assert_eq!(by_name["-bad"].error_type, Some(BulkErrorType::BadData));
        assert_eq!(resp.items[0].rule_name, "fresh");

        assert_eq!(
            h.store.rule_names("test").await,
            vec!["dup", "existing", "fresh"]
        );
    }

    #[tokio::test]
    async fn test_bulk_delete() {
        let h = harness().await;
        h.operator
            .create_custom_alerting_rule("test", postable("cpu-high", "up == 0"))
            .await
            .unwrap();

        let resp = h
            .operator
            .delete_custom_alerting_rules(
                "test",
                vec!["cpu-high".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();

        assert!(resp.errors);
        assert_eq!(resp.items[0].status, BulkStatus::Success);
        assert_eq!(resp.items[0].result, Some(BulkResult::Deleted));
        assert_eq!(resp.items[1].error_type, Some(BulkErrorType::NotFound));
        assert!(h.store.rule_names("test").await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_rules_need_thanos_ruler() {
        let h = harness().await;
        let rulers = Arc::new(RulerRegistry::new(
            h.store.clone(),
            RulerOptions::default(),
            None,
            None,
        ));
        let operator = Operator::new(
            Arc::new(RuleCache::new()),
            rulers,
            h.prometheus.clone(),
            None,
            Arc::new(OperatorRuleFileNaming),
            OperatorOptions::default(),
        );

        let err = operator
            .create_custom_alerting_rule("test", postable("cpu-high", "up"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineNotEnabled { .. }));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    fn live_builtin_group() -> client::RuleGroup {
        client::RuleGroup {
            name: "node".to_string(),
            file: format!("/etc/prometheus/rules/prometheus-k8s-rulefiles-0/{MONITORING_NAMESPACE}-builtin.yaml"),
            rules: vec![client::AlertingRule {
                state: "pending".to_string(),
                name: "NodeDown".to_string(),
                query: "up == 0".to_string(),
                health: "ok".to_string(),
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn test_builtin_rules_from_endpoint_only() {
        let h = harness().await;
        h.prometheus.set(vec![live_builtin_group()]).await;

        let list = h
            .operator
            .list_builtin_alerting_rules(&Default::default())
            .await
            .unwrap();
        assert_eq!(list.total, 1);
        let rule = &list.items[0];
        assert_eq!(rule.rule.name, "NodeDown");
        assert_eq!(rule.state, RuleState::Pending);

        let fetched = h
            .operator
            .get_builtin_alerting_rule(&rule.rule.id)
            .await
            .unwrap();
        assert_eq!(fetched.rule.name, "NodeDown");

        let err = h
            .operator
            .get_builtin_alerting_rule("0000000000000000")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_builtin_rules_from_resources() {
        let h = harness().await;
        h.rulers.set_prometheus(prometheus_resource()).await;
        h.prometheus.set(vec![live_builtin_group()]).await;

        let node_down = alert_rule("NodeDown", "up == 0");
        h.store
            .insert(rule_resource(
                MONITORING_NAMESPACE,
                "builtin",
                &PROMETHEUS_RULE_RESOURCE_LABELS,
                vec![rule_group("node", vec![node_down.clone()])],
            ))
            .await;
        let mut leveled = PROMETHEUS_RULE_RESOURCE_LABELS.to_vec();
        leveled.push((LABEL_KEY_RULE_LEVEL, "cluster"));
        h.store
            .insert(rule_resource(
                MONITORING_NAMESPACE,
                "leveled",
                &leveled,
                vec![rule_group("custom", vec![alert_rule("Custom", "up")])],
            ))
            .await;

        let list = h
            .operator
            .list_builtin_alerting_rules(&Default::default())
            .await
            .unwrap();
        assert_eq!(list.total, 1);
        let id = gen_resource_rule_id("node", &node_down);
        assert_eq!(list.items[0].rule.id, id);
        assert_eq!(list.items[0].state, RuleState::Pending);

        let rule = h.operator.get_builtin_alerting_rule(&id).await.unwrap();
        assert_eq!(rule.rule.name, "NodeDown");
        let alerts = h
            .operator
            .list_builtin_specified_rule_alerts(&id)
            .await
            .unwrap();
        assert_eq!(alerts.total, 0);
        let all_alerts = h
            .operator
            .list_builtin_rules_alerts(&Default::default())
            .await
            .unwrap();
        assert!(all_alerts.items.is_empty());
    }
}
