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


//! Merges rule definitions from resources with the live state reported by
//! the rule engines.

use crate::client;
use crate::rules::cache::{ResourceRuleCollection, ResourceRuleItem};
use crate::rules::file::RuleFileNaming;
use crate::rules::fingerprint::gen_endpoint_rule_id;
use crate::types::v2alpha1::rule::{
    Alert, AlertingRule, GettableAlertingRule, RuleHealth, RuleLevel, RuleState,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Indexed resources of one namespace plus how their rules are presented.
pub struct RuleChunk<'a> {
    pub namespace: &'a str,
    pub level: RuleLevel,
    /// Custom rules are unique by name, builtin rules by id.
    pub custom: bool,
    pub resources: &'a BTreeMap<String, ResourceRuleCollection>,
}

/// Statuses of every rule in `chunk`.
pub fn get_alerting_rules_status(
    chunk: &RuleChunk<'_>,
    live_groups: &[client::RuleGroup],
    external_labels: &BTreeMap<String, String>,
    naming: &dyn RuleFileNaming,
) -> Vec<GettableAlertingRule> {
    let live = index_live_rules(chunk, live_groups, external_labels, naming);

    let mut rules: Vec<GettableAlertingRule> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for collection in chunk.resources.values() {
        for item in collection.id_rules.values() {
            let status = merge_rule_status(item, pick_live(&live, item), chunk.level);
            let key = if chunk.custom {
                status.rule.name.clone()
            } else {
                status.rule.id.clone()
            };
            match positions.get(&key) {
                // the smallest id wins among same-named custom rules
                Some(&i) if chunk.custom && status.rule.id < rules[i].rule.id => rules[i] = status,
                Some(_) => {}
                None => {
                    positions.insert(key, rules.len());
                    rules.push(status);
                }
            }
        }
    }
    rules
}

/// Status of one rule from `chunk`.
pub fn get_alerting_rule_status(
    chunk: &RuleChunk<'_>,
    item: &ResourceRuleItem,
    live_groups: &[client::RuleGroup],
    external_labels: &BTreeMap<String, String>,
    naming: &dyn RuleFileNaming,
) -> GettableAlertingRule {
    let live = index_live_rules(chunk, live_groups, external_labels, naming);
    merge_rule_status(item, pick_live(&live, item), chunk.level)
}

/// Rules straight from the engine, for when no resources back them.
///
/// `filter` sees the group name, the computed id and the live rule.
/// Rules are unique by id.
pub fn parse_alerting_rules<F>(
    live_groups: &[client::RuleGroup],
    external_labels: &BTreeMap<String, String>,
    level: RuleLevel,
    filter: F,
) -> Vec<GettableAlertingRule>
where
    F: Fn(&str, &str, &client::AlertingRule) -> bool,
{
    let mut seen = HashSet::new();
    let mut rules = Vec::new();
    for group in live_groups {
        for live in group.rules.iter().filter(|r| r.is_alerting()) {
            let id = gen_endpoint_rule_id(&group.name, live, external_labels);
            if !filter(&group.name, &id, live) || !seen.insert(id.clone()) {
                continue;
            }
            let definition = AlertingRule {
                id,
                name: live.name.clone(),
                query: live.query.clone(),
                duration: crate::rules::duration::format(crate::rules::duration::from_seconds(
                    live.duration,
                )),
                labels: live.labels.clone(),
                annotations: live.annotations.clone(),
            };
            rules.push(with_live_state(definition, Some(live), level));
        }
    }
    rules
}

type LiveIndex<'a> = HashMap<(String, String), Vec<&'a client::AlertingRule>>;

// Live rules keyed by (resource name, rule id). A group is attributed to a
// resource only when its file was generated from that resource and the
// resource declares a group of that name.
fn index_live_rules<'a>(
    chunk: &RuleChunk<'_>,
    live_groups: &'a [client::RuleGroup],
    external_labels: &BTreeMap<String, String>,
    naming: &dyn RuleFileNaming,
) -> LiveIndex<'a> {
    let mut index: LiveIndex<'a> = HashMap::new();
    for group in live_groups {
        let Some(resource_name) = chunk.resources.iter().find_map(|(name, collection)| {
            (collection.group_set.contains(&group.name)
                && naming.is_resource_file(
                    &group.file,
                    chunk.namespace,
                    name,
                    collection.uid.as_deref(),
                ))
            .then_some(name)
        }) else {
            continue;
        };
        for live in group.rules.iter().filter(|r| r.is_alerting()) {
            let id = gen_endpoint_rule_id(&group.name, live, external_labels);
            index
                .entry((resource_name.clone(), id))
                .or_default()
                .push(live);
        }
    }
    index
}

fn pick_live<'a>(index: &LiveIndex<'a>, item: &ResourceRuleItem) -> Option<&'a client::AlertingRule> {
    let candidates = index.get(&(item.resource_name.clone(), item.id.clone()))?;
    candidates
        .iter()
        .find(|live| live.name == item.rule.alert_name())
        .or_else(|| candidates.first())
        .copied()
}

fn merge_rule_status(
    item: &ResourceRuleItem,
    live: Option<&client::AlertingRule>,
    level: RuleLevel,
) -> GettableAlertingRule {
    let definition = AlertingRule {
        id: item.id.clone(),
        name: item.rule.alert_name().to_string(),
        query: item.rule.expr_string(),
        duration: item.rule.duration().to_string(),
        labels: item.rule.labels.clone(),
        annotations: item.rule.annotations.clone(),
    };
    with_live_state(definition, live, level)
}

fn with_live_state(
    definition: AlertingRule,
    live: Option<&client::AlertingRule>,
    level: RuleLevel,
) -> GettableAlertingRule {
    let mut status = GettableAlertingRule {
        level: Some(level),
        ..Default::default()
    };
    if let Some(live) = live {
        status.alerts = live
            .alerts
            .iter()
            .map(|alert| Alert {
                active_at: alert.active_at.filter(|t| t.timestamp() > 0),
                annotations: alert.annotations.clone(),
                labels: alert.labels.clone(),
                state: alert.state.parse().unwrap_or_default(),
                value: alert.value.clone(),
                rule_id: definition.id.clone(),
                rule_name: definition.name.clone(),
            })
            .collect();
        // an engine that omits the rule state gets the most severe alert's
        status.state = live
            .state
            .parse()
            .ok()
            .unwrap_or_else(|| status.alerts.iter().map(|a| a.state).max().unwrap_or_default());
        status.health = live.health.parse().unwrap_or(RuleHealth::Unknown);
        status.last_error = live.last_error.clone();
        status.evaluation_duration_seconds = live.evaluation_time;
        status.last_evaluation = live.last_evaluation.filter(|t| t.timestamp() > 0);
    }
    status.rule = definition;
    status
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rules::cache::RuleCache;
    use crate::rules::file::OperatorRuleFileNaming;
    use crate::rules::fingerprint::gen_resource_rule_id;
    use crate::rules::ruler::ThanosRuler;
    use crate::rules::selector::Selector;
    use crate::tests::{
        MemoryStore, THANOS_RULE_RESOURCE_LABELS, alert_rule, rule_group, rule_resource,
        thanos_ruler_resource,
    };
    use std::sync::Arc;

    async fn indexed(
        resources: Vec<crate::types::v1::prometheus_rule::PrometheusRule>,
    ) -> BTreeMap<String, ResourceRuleCollection> {
        let cache = RuleCache::new();
        for resource in &resources {
            cache.apply(resource).await;
        }
        let ruler = ThanosRuler::new(
            thanos_ruler_resource(),
            Arc::new(MemoryStore::new()),
            Default::default(),
            Default::default(),
        );
        cache
            .list_rules(&ruler, "test", &Selector::everything())
            .await
            .unwrap()
    }

    fn live_rule(name: &str, query: &str, state: &str, alerts: &[&str]) -> client::AlertingRule {
        client::AlertingRule {
            state: state.to_string(),
            name: name.to_string(),
            query: query.to_string(),
            health: "ok".to_string(),
            alerts: alerts
                .iter()
                .map(|s| client::Alert {
                    state: s.to_string(),
                    labels: [("alertname".to_string(), name.to_string())].into(),
                    ..Default::default()
                })
                .collect(),
            type_: "alerting".to_string(),
            ..Default::default()
        }
    }

    fn live_group(resource: &str, rules: Vec<client::AlertingRule>) -> client::RuleGroup {
        client::RuleGroup {
            name: "g".to_string(),
            file: format!("/etc/thanos/rules/rulefiles-0/test-{resource}.yaml"),
            rules,
        }
    }

    #[tokio::test]
    async fn test_merge_with_live_state() {
        let resources = indexed(vec![rule_resource(
            "test",
            "r1",
            &THANOS_RULE_RESOURCE_LABELS,
            vec![rule_group(
                "g",
                vec![alert_rule("a", "up == 0"), alert_rule("b", "up == 1")],
            )],
        )])
        .await;
        let chunk = RuleChunk {
            namespace: "test",
            level: RuleLevel::Namespace,
            custom: true,
            resources: &resources,
        };
        let live = vec![live_group(
            "r1",
            vec![live_rule("a", "up == 0", "FIRING", &["firing", "pending"])],
        )];

        let rules =
            get_alerting_rules_status(&chunk, &live, &BTreeMap::new(), &OperatorRuleFileNaming);
        assert_eq!(rules.len(), 2);

        let a = rules.iter().find(|r| r.rule.name == "a").unwrap();
        assert_eq!(a.state, RuleState::Firing);
        assert_eq!(a.health, RuleHealth::Ok);
        assert_eq!(a.alerts.len(), 2);
        assert_eq!(a.alerts[0].rule_id, a.rule.id);
        assert_eq!(a.alerts[1].state, RuleState::Pending);
        assert_eq!(a.level, Some(RuleLevel::Namespace));

        let b = rules.iter().find(|r| r.rule.name == "b").unwrap();
        assert_eq!(b.state, RuleState::Inactive);
        assert_eq!(b.health, RuleHealth::Unknown);
        assert!(b.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_state_falls_back_to_alerts() {
        let resources = indexed(vec![rule_resource(
            "test",
            "r1",
            &THANOS_RULE_RESOURCE_LABELS,
            vec![rule_group("g", vec![alert_rule("a", "up == 0")])],
        )])
        .await;
        let chunk = RuleChunk {
            namespace: "test",
            level: RuleLevel::Namespace,
            custom: true,
            resources: &resources,
        };
        let item = resources["r1"].name_rules["a"][0].clone();
        let live = vec![live_group(
            "r1",
            vec![live_rule("a", "up == 0", "", &["pending", "firing"])],
        )];

        let status = get_alerting_rule_status(
            &chunk,
            &item,
            &live,
            &BTreeMap::new(),
            &OperatorRuleFileNaming,
        );
        assert_eq!(status.state, RuleState::Firing);
    }

    #[tokio::test]
    async fn test_live_rules_from_other_files_are_ignored() {
        let resources = indexed(vec![rule_resource(
            "test",
            "r1",
            &THANOS_RULE_RESOURCE_LABELS,
            vec![rule_group("g", vec![alert_rule("a", "up == 0")])],
        )])
        .await;
        let chunk = RuleChunk {
            namespace: "test",
            level: RuleLevel::Namespace,
            custom: true,
            resources: &resources,
        };
        let live = vec![live_group(
            "r2",
            vec![live_rule("a", "up == 0", "firing", &["firing"])],
        )];

        let rules =
            get_alerting_rules_status(&chunk, &live, &BTreeMap::new(), &OperatorRuleFileNaming);
        assert_eq!(rules[0].state, RuleState::Inactive);
    }

    #[tokio::test]
    async fn test_custom_rules_dedup_by_name() {
        let resources = indexed(vec![
            rule_resource(
                "test",
                "r1",
                &THANOS_RULE_RESOURCE_LABELS,
                vec![rule_group("g", vec![alert_rule("a", "up == 0")])],
            ),
            rule_resource(
                "test",
                "r2",
                &THANOS_RULE_RESOURCE_LABELS,
                vec![rule_group("g", vec![alert_rule("a", "up == 1")])],
            ),
        ])
        .await;

        let custom = RuleChunk {
            namespace: "test",
            level: RuleLevel::Namespace,
            custom: true,
            resources: &resources,
        };
        let rules = get_alerting_rules_status(&custom, &[], &BTreeMap::new(), &OperatorRuleFileNaming);
        assert_eq!(rules.len(), 1);
        let smallest = [
            gen_resource_rule_id("g", &alert_rule("a", "up == 0")),
            gen_resource_rule_id("g", &alert_rule("a", "up == 1")),
        ]
        .into_iter()
        .min()
        .unwrap();
        assert_eq!(rules[0].rule.id, smallest);

        let builtin = RuleChunk {
            custom: false,
            level: RuleLevel::Cluster,
            ..custom
        };
        let rules = get_alerting_rules_status(&builtin, &[], &BTreeMap::new(), &OperatorRuleFileNaming);
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_parse_alerting_rules_filters_and_dedups() {
        let live = vec![
            client::RuleGroup {
                name: "node".to_string(),
                file: "/rules/a.yaml".to_string(),
                rules: vec![
                    live_rule("NodeDown", "up == 0", "firing", &["firing"]),
                    live_rule("NodeDown", "up == 0", "firing", &["firing"]),
                    client::AlertingRule {
                        type_: "recording".to_string(),
                        ..live_rule("node:up", "up", "", &[])
                    },
                ],
            },
            client::RuleGroup {
                name: "disk".to_string(),
                file: "/rules/b.yaml".to_string(),
                rules: vec![live_rule("DiskFull", "disk > 0.9", "inactive", &[])],
            },
        ];

        let all = parse_alerting_rules(&live, &BTreeMap::new(), RuleLevel::Cluster, |_, _, _| true);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].state, RuleState::Firing);
        assert_eq!(all[0].rule.duration, "0s");

        let id = all[1].rule.id.clone();
        let one = parse_alerting_rules(&live, &BTreeMap::new(), RuleLevel::Cluster, |_, rid, _| {
            rid == id
        });
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].rule.name, "DiskFull");
    }
}
