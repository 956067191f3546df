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

use crate::types;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The rule file container evaluated by Prometheus and Thanos Ruler.
///
/// Only the fields the rule engine reads or writes are modelled; unknown
/// fields of the upstream resource are ignored on read.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "PrometheusRule",
    namespaced,
    plural = "prometheusrules",
    singular = "prometheusrule",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusRuleSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<RuleGroup>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_response_strategy: Option<String>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A single alerting or recording rule.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,

    pub expr: IntOrString,

    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            record: None,
            alert: None,
            expr: IntOrString::String(String::new()),
            for_: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

impl Rule {
    /// Alert name, or an empty string for recording rules.
    pub fn alert_name(&self) -> &str {
        self.alert.as_deref().unwrap_or_default()
    }

    pub fn is_alerting(&self) -> bool {
        self.alert.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn expr_string(&self) -> String {
        match &self.expr {
            IntOrString::Int(i) => i.to_string(),
            IntOrString::String(s) => s.clone(),
        }
    }

    pub fn duration(&self) -> &str {
        self.for_.as_deref().unwrap_or_default()
    }
}

impl PrometheusRule {
    /// Size of the serialized rule groups, the quantity bounded by the
    /// configured resource size ceiling.
    pub fn spec_size(&self) -> Result<usize, types::error::Error> {
        Ok(serde_yaml_ng::to_string(&self.spec)?.len())
    }
}
