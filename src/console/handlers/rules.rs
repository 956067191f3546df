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

//! Custom rule endpoints. Cluster level routes address the empty namespace.

use crate::console::error::{BadRequestSnafu, Result};
use crate::console::handlers::{Message, success};
use crate::console::state::AppState;
use crate::types::v2alpha1::bulk::BulkResponse;
use crate::types::v2alpha1::query::{AlertQueryParams, AlertingRuleQueryParams};
use crate::types::v2alpha1::rule::{
    AlertList, GettableAlertingRule, GettableAlertingRuleList, PostableAlertingRule,
};
use axum::{
    Json,
    extract::{Path, Query, RawQuery, State},
};
use std::collections::HashMap;

const CLUSTER: &str = "";

type PathParams = HashMap<String, String>;

fn namespace_of(params: &PathParams) -> &str {
    params.get("namespace").map(String::as_str).unwrap_or(CLUSTER)
}

fn param<'a>(params: &'a PathParams, key: &str) -> Result<&'a str> {
    match params.get(key) {
        Some(value) => Ok(value.as_str()),
        None => BadRequestSnafu {
            message: format!("missing path parameter {key}"),
        }
        .fail(),
    }
}

// Bulk deletes name their rules with repeated `name` parameters.
fn names_of(query: Option<String>) -> Result<Vec<String>> {
    let names: Vec<String> = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .filter(|(k, _)| k == "name")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .collect();
    if names.is_empty() {
        return BadRequestSnafu {
            message: "no rule names given",
        }
        .fail();
    }
    Ok(names)
}

async fn list(
    state: &AppState,
    namespace: &str,
    query: &HashMap<String, String>,
) -> Result<Json<GettableAlertingRuleList>> {
    let query = AlertingRuleQueryParams::from_query(query);
    Ok(Json(
        state
            .operator
            .list_custom_alerting_rules(namespace, &query)
            .await?,
    ))
}

async fn create(
    state: &AppState,
    namespace: &str,
    rule: PostableAlertingRule,
) -> Result<Json<Message>> {
    state
        .operator
        .create_custom_alerting_rule(namespace, rule)
        .await?;
    Ok(success())
}

async fn alerts(
    state: &AppState,
    namespace: &str,
    query: &HashMap<String, String>,
) -> Result<Json<AlertList>> {
    let query = AlertQueryParams::from_query(query);
    Ok(Json(
        state
            .operator
            .list_custom_rules_alerts(namespace, &query)
            .await?,
    ))
}

async fn bulk_update(
    state: &AppState,
    namespace: &str,
    rules: Vec<PostableAlertingRule>,
) -> Result<Json<BulkResponse>> {
    Ok(Json(
        state
            .operator
            .create_or_update_custom_alerting_rules(namespace, rules)
            .await?,
    ))
}

async fn bulk_delete(
    state: &AppState,
    namespace: &str,
    query: Option<String>,
) -> Result<Json<BulkResponse>> {
    let names = names_of(query)?;
    Ok(Json(
        state
            .operator
            .delete_custom_alerting_rules(namespace, names)
            .await?,
    ))
}

pub async fn list_cluster_rules(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<GettableAlertingRuleList>> {
    list(&state, CLUSTER, &query).await
}

pub async fn list_namespace_rules(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<GettableAlertingRuleList>> {
    list(&state, &namespace, &query).await
}

pub async fn create_cluster_rule(
    State(state): State<AppState>,
    Json(rule): Json<PostableAlertingRule>,
) -> Result<Json<Message>> {
    create(&state, CLUSTER, rule).await
}

pub async fn create_namespace_rule(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Json(rule): Json<PostableAlertingRule>,
) -> Result<Json<Message>> {
    create(&state, &namespace, rule).await
}

pub async fn list_cluster_alerts(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<AlertList>> {
    alerts(&state, CLUSTER, &query).await
}

pub async fn list_namespace_alerts(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<AlertList>> {
    alerts(&state, &namespace, &query).await
}

pub async fn bulk_update_cluster_rules(
    State(state): State<AppState>,
    Json(rules): Json<Vec<PostableAlertingRule>>,
) -> Result<Json<BulkResponse>> {
    bulk_update(&state, CLUSTER, rules).await
}

pub async fn bulk_update_namespace_rules(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Json(rules): Json<Vec<PostableAlertingRule>>,
) -> Result<Json<BulkResponse>> {
    bulk_update(&state, &namespace, rules).await
}

pub async fn bulk_delete_cluster_rules(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<BulkResponse>> {
    bulk_delete(&state, CLUSTER, query).await
}

pub async fn bulk_delete_namespace_rules(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<BulkResponse>> {
    bulk_delete(&state, &namespace, query).await
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
) -> Result<Json<GettableAlertingRule>> {
    let name = param(&params, "name")?;
    Ok(Json(
        state
            .operator
            .get_custom_alerting_rule(namespace_of(&params), name)
            .await?,
    ))
}

pub async fn list_rule_alerts(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
) -> Result<Json<AlertList>> {
    let name = param(&params, "name")?;
    Ok(Json(
        state
            .operator
            .list_custom_specified_rule_alerts(namespace_of(&params), name)
            .await?,
    ))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
    Json(rule): Json<PostableAlertingRule>,
) -> Result<Json<Message>> {
    let name = param(&params, "name")?;
    state
        .operator
        .update_custom_alerting_rule(namespace_of(&params), name, rule)
        .await?;
    Ok(success())
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
) -> Result<Json<Message>> {
    let name = param(&params, "name")?;
    state
        .operator
        .delete_custom_alerting_rule(namespace_of(&params), name)
        .await?;
    Ok(success())
}
