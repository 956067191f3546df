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

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The dedicated rule evaluation engine hosting custom alerting rules.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ThanosRuler",
    namespaced,
    plural = "thanosrulers",
    singular = "thanosruler",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ThanosRulerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_selector: Option<metav1::LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_namespace_selector: Option<metav1::LabelSelector>,

    /// External labels stamped on every rule and alert the ruler evaluates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_endpoints: Vec<String>,
}
