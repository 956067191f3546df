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

use crate::rules::{duration, promql};
use crate::types::v1::prometheus_rule::Rule;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::BTreeMap;
use strum::{Display, EnumString};

const ALERTING_GROUP: &str = "alerting.kubesphere.io";

/// Label on custom rule resources partitioning cluster and namespace rules
/// that share the same physical storage.
pub const LABEL_KEY_RULE_LEVEL: &str = const_str::concat!(ALERTING_GROUP, "/rule-level");

/// Annotation holding the RFC3339 time of the last create or update.
pub const ANNOTATION_KEY_RULE_UPDATE_TIME: &str =
    const_str::concat!(ALERTING_GROUP, "/rule-update-time");

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleLevel {
    Cluster,
    Namespace,
}

/// Evaluation state, ordered by severity.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RuleState {
    #[default]
    Inactive,
    Pending,
    Firing,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RuleHealth {
    Ok,
    Err,
    #[default]
    Unknown,
}

#[derive(Debug, Snafu)]
#[snafu(display("{}", problems.join("; ")))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

/// Definition part shared by every rendering of an alerting rule.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertingRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub duration: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Request body for creating or updating a custom alerting rule.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostableAlertingRule {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub query: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub duration: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl PostableAlertingRule {
    /// Checks every field and reports all problems at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();

        if self.name.is_empty() {
            problems.push("name can not be empty".to_string());
        } else if !is_valid_rule_name(&self.name) {
            problems.push(format!(
                "rule name {:?} must consist of alphanumeric characters or '-', and must start and end with an alphanumeric character",
                self.name
            ));
        }

        if self.query.is_empty() {
            problems.push("query can not be empty".to_string());
        } else if let Err(e) = promql::format_expr(&self.query) {
            problems.push(format!("invalid query: {}", e));
        }

        if !self.duration.is_empty()
            && let Err(e) = duration::parse(&self.duration)
        {
            problems.push(format!("invalid duration: {}", e));
        }

        for (k, v) in self.labels.iter().chain(self.annotations.iter()) {
            if !is_valid_label_name(k) {
                problems.push(format!("invalid label or annotation: {}={}", k, v));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            ValidationSnafu { problems }.fail()
        }
    }

    pub fn set_update_time(&mut self, at: DateTime<Utc>) {
        self.annotations
            .insert(ANNOTATION_KEY_RULE_UPDATE_TIME.to_string(), at.to_rfc3339());
    }

    pub fn to_prometheus_rule(&self) -> Rule {
        Rule {
            record: None,
            alert: Some(self.name.clone()),
            expr: IntOrString::String(self.query.clone()),
            for_: (!self.duration.is_empty()).then(|| self.duration.clone()),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

/// Alerting rule definition merged with its live evaluation state.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GettableAlertingRule {
    #[serde(flatten)]
    pub rule: AlertingRule,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<RuleLevel>,

    pub state: RuleState,

    pub health: RuleHealth,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,

    #[serde(rename = "evaluationTime", default)]
    pub evaluation_duration_seconds: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluation: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<Alert>,
}

impl GettableAlertingRule {
    /// Value of the update time annotation, if present and well formed.
    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.rule
            .annotations
            .get(ANNOTATION_KEY_RULE_UPDATE_TIME)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    pub state: RuleState,

    #[serde(default)]
    pub value: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rule_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rule_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GettableAlertingRuleList {
    pub items: Vec<GettableAlertingRule>,
    pub total: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AlertList {
    pub items: Vec<Alert>,
    pub total: usize,
}

fn is_valid_rule_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let alnum = |b: &u8| b.is_ascii_alphanumeric();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
        }
        _ => false,
    }
}

/// Prometheus label name grammar: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
