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


use crate::rules::selector::Selector;
use crate::types::v1::prometheus_rule::PrometheusRule;
use async_trait::async_trait;
use snafu::Snafu;
use std::collections::BTreeMap;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("{kind} {namespace}/{name} not found"))]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} was modified concurrently: {message}"))]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },

    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Persistence of PrometheusRule resources plus the namespace metadata
/// needed to scope them.
///
/// `replace` and `delete` honour `metadata.resourceVersion` (delete via an
/// explicit precondition) and fail with [`StoreError::Conflict`] when the
/// stored object has moved on.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_rule_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PrometheusRule, StoreError>;

    async fn list_rule_resources(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<PrometheusRule>, StoreError>;

    /// Creates the resource; `metadata.generateName` is honoured.
    async fn create_rule_resource(
        &self,
        namespace: &str,
        resource: &PrometheusRule,
    ) -> Result<PrometheusRule, StoreError>;

    async fn replace_rule_resource(
        &self,
        namespace: &str,
        resource: &PrometheusRule,
    ) -> Result<PrometheusRule, StoreError>;

    async fn delete_rule_resource(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, StoreError>;
}
