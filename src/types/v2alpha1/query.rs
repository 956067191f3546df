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

//! Filter, sort and paging parameters of the list endpoints.
//!
//! Every list applies the pipeline in the same order: filter, then sort, then
//! slice out the requested page.

use crate::types::v2alpha1::rule::{Alert, GettableAlertingRule};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

pub const FIELD_NAME: &str = "name";
pub const FIELD_STATE: &str = "state";
pub const FIELD_HEALTH: &str = "health";
pub const FIELD_LABEL_FILTERS: &str = "label_filters";
pub const FIELD_SORT_FIELD: &str = "sort_field";
pub const FIELD_SORT_TYPE: &str = "sort_type";
pub const FIELD_PAGE: &str = "page";
pub const FIELD_LIMIT: &str = "limit";

pub const SORT_FIELD_NAME: &str = "name";
pub const SORT_FIELD_LAST_EVALUATION: &str = "lastEvaluation";
pub const SORT_FIELD_EVALUATION_TIME: &str = "evaluationTime";
pub const SORT_TYPE_DESC: &str = "desc";

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct AlertingRuleQueryParams {
    pub name_contain_filter: String,
    pub state: String,
    pub health: String,
    pub label_equal_filters: BTreeMap<String, String>,
    pub label_contain_filters: BTreeMap<String, String>,
    pub page: usize,
    pub limit: usize,
    pub sort_field: String,
    pub sort_type: String,
}

impl Default for AlertingRuleQueryParams {
    fn default() -> Self {
        Self {
            name_contain_filter: String::new(),
            state: String::new(),
            health: String::new(),
            label_equal_filters: BTreeMap::new(),
            label_contain_filters: BTreeMap::new(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort_field: String::new(),
            sort_type: String::new(),
        }
    }
}

impl AlertingRuleQueryParams {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let get = |key: &str| query.get(key).cloned().unwrap_or_default();
        let (label_equal_filters, label_contain_filters) = parse_label_filters(&get(FIELD_LABEL_FILTERS));

        Self {
            name_contain_filter: get(FIELD_NAME),
            state: get(FIELD_STATE),
            health: get(FIELD_HEALTH),
            label_equal_filters,
            label_contain_filters,
            page: parse_positive(query.get(FIELD_PAGE), DEFAULT_PAGE),
            limit: parse_positive(query.get(FIELD_LIMIT), DEFAULT_LIMIT),
            sort_field: get(FIELD_SORT_FIELD),
            sort_type: get(FIELD_SORT_TYPE),
        }
    }

    pub fn filter(&self, rules: Vec<GettableAlertingRule>) -> Vec<GettableAlertingRule> {
        rules.into_iter().filter(|r| self.matches(r)).collect()
    }

    fn matches(&self, rule: &GettableAlertingRule) -> bool {
        if !self.name_contain_filter.is_empty()
            && !rule
                .rule
                .name
                .to_lowercase()
                .contains(&self.name_contain_filter.to_lowercase())
        {
            return false;
        }
        if !self.state.is_empty() && self.state != rule.state.to_string() {
            return false;
        }
        if !self.health.is_empty() && self.health != rule.health.to_string() {
            return false;
        }
        labels_match(
            &rule.rule.labels,
            &self.label_equal_filters,
            &self.label_contain_filters,
        )
    }

    pub fn sort(&self, rules: &mut [GettableAlertingRule]) {
        let reverse = self.sort_type == SORT_TYPE_DESC;
        let directed = |o: Ordering| if reverse { o.reverse() } else { o };

        match self.sort_field.as_str() {
            SORT_FIELD_NAME => rules.sort_by(|a, b| {
                directed(a.rule.name.cmp(&b.rule.name)).then_with(|| fallback_order(a, b))
            }),
            SORT_FIELD_LAST_EVALUATION => rules.sort_by(|a, b| {
                // rules never evaluated go last in both directions
                match (a.last_evaluation, b.last_evaluation) {
                    (Some(l), Some(r)) => directed(l.cmp(&r)),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
                .then_with(|| fallback_order(a, b))
            }),
            SORT_FIELD_EVALUATION_TIME => rules.sort_by(|a, b| {
                directed(
                    a.evaluation_duration_seconds
                        .total_cmp(&b.evaluation_duration_seconds),
                )
                .then_with(|| fallback_order(a, b))
            }),
            _ => rules.sort_by(fallback_order),
        }
    }

    pub fn sub<T: Clone>(&self, items: &[T]) -> Vec<T> {
        page_of(items, self.page, self.limit)
    }
}

/// Default order of alerting rules: most recently updated first, then
/// ascending id. It keeps list pages and lookups among duplicates stable.
pub fn fallback_order(a: &GettableAlertingRule, b: &GettableAlertingRule) -> Ordering {
    b.update_time()
        .cmp(&a.update_time())
        .then_with(|| a.rule.id.cmp(&b.rule.id))
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertQueryParams {
    pub state: String,
    pub label_equal_filters: BTreeMap<String, String>,
    pub label_contain_filters: BTreeMap<String, String>,
    pub page: usize,
    pub limit: usize,
}

impl Default for AlertQueryParams {
    fn default() -> Self {
        Self {
            state: String::new(),
            label_equal_filters: BTreeMap::new(),
            label_contain_filters: BTreeMap::new(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl AlertQueryParams {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let (label_equal_filters, label_contain_filters) = parse_label_filters(
            query
                .get(FIELD_LABEL_FILTERS)
                .map(String::as_str)
                .unwrap_or_default(),
        );

        Self {
            state: query.get(FIELD_STATE).cloned().unwrap_or_default(),
            label_equal_filters,
            label_contain_filters,
            page: parse_positive(query.get(FIELD_PAGE), DEFAULT_PAGE),
            limit: parse_positive(query.get(FIELD_LIMIT), DEFAULT_LIMIT),
        }
    }

    pub fn filter(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        alerts
            .into_iter()
            .filter(|a| {
                (self.state.is_empty() || self.state == a.state.to_string())
                    && labels_match(
                        &a.labels,
                        &self.label_equal_filters,
                        &self.label_contain_filters,
                    )
            })
            .collect()
    }

    /// Newest alerts first; alerts without an activation time go last.
    pub fn sort(&self, alerts: &mut [Alert]) {
        alerts.sort_by(|a, b| {
            match (a.active_at, b.active_at) {
                (Some(l), Some(r)) => r.cmp(&l),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.labels.cmp(&b.labels))
        });
    }

    pub fn sub<T: Clone>(&self, items: &[T]) -> Vec<T> {
        page_of(items, self.page, self.limit)
    }
}

/// Splits `k=v` (exact) and `k~v` (substring) filters out of a comma
/// separated list. Entries with an empty key or value are ignored.
pub fn parse_label_filters(raw: &str) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut equal = BTreeMap::new();
    let mut contain = BTreeMap::new();

    for filter in raw.split(',') {
        if let Some((k, v)) = filter.split_once('=')
            && !k.is_empty()
            && !v.is_empty()
        {
            equal.insert(k.to_string(), v.to_string());
        } else if let Some((k, v)) = filter.split_once('~')
            && !k.is_empty()
            && !v.is_empty()
        {
            contain.insert(k.to_string(), v.to_string());
        }
    }

    (equal, contain)
}

fn labels_match(
    labels: &BTreeMap<String, String>,
    equal: &BTreeMap<String, String>,
    contain: &BTreeMap<String, String>,
) -> bool {
    equal
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
        && contain
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv.contains(v.as_str())))
}

fn parse_positive(raw: Option<&String>, default: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

fn page_of<T: Clone>(items: &[T], page: usize, limit: usize) -> Vec<T> {
    let start = page.saturating_sub(1).saturating_mul(limit);
    if start >= items.len() {
        return Vec::new();
    }
    let stop = start.saturating_add(limit).min(items.len());
    items[start..stop].to_vec()
}
