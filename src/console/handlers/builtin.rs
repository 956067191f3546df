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

use crate::console::error::Result;
use crate::console::state::AppState;
use crate::types::v2alpha1::query::{AlertQueryParams, AlertingRuleQueryParams};
use crate::types::v2alpha1::rule::{AlertList, GettableAlertingRule, GettableAlertingRuleList};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use std::collections::HashMap;

pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<GettableAlertingRuleList>> {
    let query = AlertingRuleQueryParams::from_query(&query);
    Ok(Json(
        state.operator.list_builtin_alerting_rules(&query).await?,
    ))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<AlertList>> {
    let query = AlertQueryParams::from_query(&query);
    Ok(Json(state.operator.list_builtin_rules_alerts(&query).await?))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GettableAlertingRule>> {
    Ok(Json(state.operator.get_builtin_alerting_rule(&id).await?))
}

pub async fn list_rule_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlertList>> {
    Ok(Json(
        state
            .operator
            .list_builtin_specified_rule_alerts(&id)
            .await?,
    ))
}
