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

use axum::{
    Router,
    routing::{get, post},
};

use crate::console::{handlers, state::AppState};

/// Custom rules at cluster level and per namespace.
pub fn rule_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rules",
            get(handlers::rules::list_cluster_rules).post(handlers::rules::create_cluster_rule),
        )
        .route(
            "/rules/{name}",
            get(handlers::rules::get_rule)
                .put(handlers::rules::update_rule)
                .delete(handlers::rules::delete_rule),
        )
        .route("/rules/{name}/alerts", get(handlers::rules::list_rule_alerts))
        .route("/alerts", get(handlers::rules::list_cluster_alerts))
        .route(
            "/bulkrules",
            post(handlers::rules::bulk_update_cluster_rules)
                .delete(handlers::rules::bulk_delete_cluster_rules),
        )
        .route(
            "/namespaces/{namespace}/rules",
            get(handlers::rules::list_namespace_rules).post(handlers::rules::create_namespace_rule),
        )
        .route(
            "/namespaces/{namespace}/rules/{name}",
            get(handlers::rules::get_rule)
                .put(handlers::rules::update_rule)
                .delete(handlers::rules::delete_rule),
        )
        .route(
            "/namespaces/{namespace}/rules/{name}/alerts",
            get(handlers::rules::list_rule_alerts),
        )
        .route(
            "/namespaces/{namespace}/alerts",
            get(handlers::rules::list_namespace_alerts),
        )
        .route(
            "/namespaces/{namespace}/bulkrules",
            post(handlers::rules::bulk_update_namespace_rules)
                .delete(handlers::rules::bulk_delete_namespace_rules),
        )
}

/// Builtin rules, addressed by id.
pub fn builtin_routes() -> Router<AppState> {
    Router::new()
        .route("/builtin/rules", get(handlers::builtin::list_rules))
        .route("/builtin/rules/{id}", get(handlers::builtin::get_rule))
        .route(
            "/builtin/rules/{id}/alerts",
            get(handlers::builtin::list_rule_alerts),
        )
        .route("/builtin/alerts", get(handlers::builtin::list_alerts))
}
