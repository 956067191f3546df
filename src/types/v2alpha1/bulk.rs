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

use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BulkStatus {
    Success,
    Error,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BulkResult {
    Created,
    Updated,
    Deleted,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BulkErrorType {
    BadData,
    DuplicateName,
    NotFound,
    ServerError,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResponse {
    pub rule_name: String,

    pub status: BulkStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BulkResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<BulkErrorType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkItemResponse {
    pub fn success(rule_name: impl Into<String>, result: BulkResult) -> Self {
        Self {
            rule_name: rule_name.into(),
            status: BulkStatus::Success,
            result: Some(result),
            error_type: None,
            error: None,
        }
    }

    pub fn error(rule_name: impl Into<String>, error_type: BulkErrorType, error: impl ToString) -> Self {
        Self {
            rule_name: rule_name.into(),
            status: BulkStatus::Error,
            result: None,
            error_type: Some(error_type),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == BulkStatus::Error
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BulkResponse {
    pub errors: bool,
    pub items: Vec<BulkItemResponse>,
}

impl BulkResponse {
    /// Collapses per-item outcomes to one item per rule name.
    ///
    /// A later outcome replaces an earlier one unless the earlier one failed
    /// and the later one succeeded. Names keep the order of their first
    /// appearance.
    pub fn from_items(items: Vec<BulkItemResponse>) -> Self {
        let mut merged: Vec<BulkItemResponse> = Vec::with_capacity(items.len());

        for item in items {
            match merged.iter_mut().find(|m| m.rule_name == item.rule_name) {
                Some(prev) => {
                    if !prev.is_error() || item.is_error() {
                        *prev = item;
                    }
                }
                None => merged.push(item),
            }
        }

        Self {
            errors: merged.iter().any(BulkItemResponse::is_error),
            items: merged,
        }
    }
}
