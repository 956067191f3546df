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
use crate::rules::store::{ConflictSnafu, KubeSnafu, NotFoundSnafu, ResourceStore, StoreError};
use crate::types::v1::prometheus_rule::PrometheusRule;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::runtime::reflector::{ObjectRef, Store};
use snafu::futures::TryFutureExt;
use std::collections::BTreeMap;
use tracing::debug;

const RULE_RESOURCE_KIND: &str = "PrometheusRule";

/// Kubernetes backed [`ResourceStore`]. Namespace labels are served from a
/// reflector kept up to date by the caller.
#[derive(Clone)]
pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) namespaces: Store<Namespace>,
}

impl Context {
    pub fn new(client: kube::Client, namespaces: Store<Namespace>) -> Self {
        Self { client, namespaces }
    }

    fn rules_api(&self, namespace: &str) -> Api<PrometheusRule> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

// 404 and 409 carry meaning for the callers; everything else is opaque.
fn classify(error: kube::Error, namespace: &str, name: &str) -> StoreError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => NotFoundSnafu {
            kind: RULE_RESOURCE_KIND,
            namespace,
            name,
        }
        .build(),
        kube::Error::Api(ae) if ae.code == 409 => ConflictSnafu {
            kind: RULE_RESOURCE_KIND,
            namespace,
            name,
            message: ae.message.clone(),
        }
        .build(),
        source => StoreError::Kube { source },
    }
}

#[async_trait]
impl ResourceStore for Context {
    async fn get_rule_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PrometheusRule, StoreError> {
        self.rules_api(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, namespace, name))
    }

    async fn list_rule_resources(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<PrometheusRule>, StoreError> {
        if selector.is_nothing() {
            return Ok(Vec::new());
        }
        let params = ListParams::default().labels(&selector.to_string());
        let list = self
            .rules_api(namespace)
            .list(&params)
            .context(KubeSnafu)
            .await?;
        Ok(list.items)
    }

    async fn create_rule_resource(
        &self,
        namespace: &str,
        resource: &PrometheusRule,
    ) -> Result<PrometheusRule, StoreError> {
        let name = resource
            .metadata
            .name
            .clone()
            .or_else(|| resource.metadata.generate_name.clone())
            .unwrap_or_default();
        let created = self
            .rules_api(namespace)
            .create(&PostParams::default(), resource)
            .await
            .map_err(|e| classify(e, namespace, &name))?;
        debug!(namespace, name = ?created.metadata.name, "created rule resource");
        Ok(created)
    }

    async fn replace_rule_resource(
        &self,
        namespace: &str,
        resource: &PrometheusRule,
    ) -> Result<PrometheusRule, StoreError> {
        let name = resource.metadata.name.clone().unwrap_or_default();
        self.rules_api(namespace)
            .replace(&name, &PostParams::default(), resource)
            .await
            .map_err(|e| classify(e, namespace, &name))
    }

    async fn delete_rule_resource(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: resource_version.map(|rv| Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            }),
            ..Default::default()
        };
        self.rules_api(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| classify(e, namespace, name))?;
        debug!(namespace, name, "deleted rule resource");
        Ok(())
    }

    async fn namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let found = self
            .namespaces
            .get(&ObjectRef::new(namespace))
            .ok_or_else(|| {
                NotFoundSnafu {
                    kind: "Namespace",
                    namespace: "",
                    name: namespace,
                }
                .build()
            })?;
        Ok(found.metadata.labels.clone().unwrap_or_default())
    }
}
