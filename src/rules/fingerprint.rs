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


//! Stable rule identifiers.
//!
//! A rule's id is a hash over its labels plus a few synthetic labels naming
//! its group, alert name, canonical query and duration. The same rule gets
//! the same id whether it is read from a resource or from a rule engine.

use crate::client;
use crate::rules::{duration, promql};
use crate::types::v1::prometheus_rule::Rule;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

pub const LABEL_KEY_INTERNAL_RULE_GROUP: &str = "__rule_group__";
pub const LABEL_KEY_INTERNAL_RULE_NAME: &str = "__rule_name__";
pub const LABEL_KEY_INTERNAL_RULE_QUERY: &str = "__rule_query__";
pub const LABEL_KEY_INTERNAL_RULE_DURATION: &str = "__rule_duration__";

pub const LABEL_KEY_THANOS_RULER_REPLICA: &str = "thanos_ruler_replica";
pub const LABEL_KEY_PROMETHEUS_REPLICA: &str = "prometheus_replica";

const SEPARATOR: u8 = 0xff;

/// Id of a rule read from a PrometheusRule resource.
pub fn gen_resource_rule_id(group: &str, rule: &Rule) -> String {
    let query = canonical_query(&rule.expr_string());
    let duration = canonical_duration(rule.duration());
    rule_id(group, rule.alert_name(), &query, &duration, &rule.labels)
}

/// Id of a rule reported by a rule engine.
///
/// Replica labels and labels injected from the engine's external labels are
/// dropped first since they never appear on the resource.
pub fn gen_endpoint_rule_id(
    group: &str,
    rule: &client::AlertingRule,
    external_labels: &BTreeMap<String, String>,
) -> String {
    let labels: BTreeMap<String, String> = rule
        .labels
        .iter()
        .filter(|(k, _)| {
            k.as_str() != LABEL_KEY_THANOS_RULER_REPLICA && k.as_str() != LABEL_KEY_PROMETHEUS_REPLICA
        })
        .filter(|(k, v)| external_labels.get(k.as_str()) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let query = canonical_query(&rule.query);
    let duration = duration::format(duration::from_seconds(rule.duration));
    rule_id(group, &rule.name, &query, &duration, &labels)
}

fn canonical_query(query: &str) -> String {
    promql::format_expr(query).unwrap_or_else(|e| {
        warn!(query, error = %e, "cannot canonicalize rule query, hashing it verbatim");
        query.trim().to_string()
    })
}

fn canonical_duration(raw: &str) -> String {
    if raw.is_empty() {
        return duration::format(0);
    }
    duration::parse(raw)
        .map(duration::format)
        .unwrap_or_else(|_| raw.to_string())
}

fn rule_id(
    group: &str,
    name: &str,
    query: &str,
    duration: &str,
    labels: &BTreeMap<String, String>,
) -> String {
    let mut labels = labels.clone();
    labels.insert(LABEL_KEY_INTERNAL_RULE_GROUP.to_string(), group.to_string());
    labels.insert(LABEL_KEY_INTERNAL_RULE_NAME.to_string(), name.to_string());
    labels.insert(LABEL_KEY_INTERNAL_RULE_QUERY.to_string(), query.to_string());
    labels.insert(
        LABEL_KEY_INTERNAL_RULE_DURATION.to_string(),
        duration.to_string(),
    );
    format!("{:016x}", fingerprint(&labels))
}

// BTreeMap iterates in key order, so the byte stream is independent of the
// order labels were written in.
fn fingerprint(labels: &BTreeMap<String, String>) -> u64 {
    let mut hasher = Sha256::new();
    for (name, value) in labels {
        hasher.update(name.as_bytes());
        hasher.update([SEPARATOR]);
        hasher.update(value.as_bytes());
        hasher.update([SEPARATOR]);
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}
