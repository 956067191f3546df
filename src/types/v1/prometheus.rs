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

/// The primary metrics engine. Only its rule discovery settings are read.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "Prometheus",
    namespaced,
    plural = "prometheuses",
    singular = "prometheus",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// PrometheusRule objects to be selected for rule evaluation. A missing
    /// selector selects no rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_selector: Option<metav1::LabelSelector>,

    /// Namespaces to be selected for PrometheusRule discovery. If unset, only
    /// the namespace of the Prometheus object is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_namespace_selector: Option<metav1::LabelSelector>,
}
