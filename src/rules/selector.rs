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


//! Label selectors evaluated in memory and rendered for list calls.

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("unsupported label selector operator {operator:?} for key {key}"))]
    InvalidOperator { key: String, operator: String },

    #[snafu(display("label selector operator {operator} for key {key} requires values"))]
    MissingValues { key: String, operator: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Equal(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equal(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => labels.get(key).is_none_or(|v| !values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equal(key, value) => write!(f, "{key}={value}"),
            Requirement::In(key, values) => write!(f, "{key} in ({})", join(values)),
            Requirement::NotIn(key, values) => write!(f, "{key} notin ({})", join(values)),
            Requirement::Exists(key) => write!(f, "{key}"),
            Requirement::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

/// A conjunction of label requirements.
///
/// An unset Kubernetes selector selects nothing while an empty one selects
/// everything, so both states are representable here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    nothing: bool,
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn nothing() -> Self {
        Self {
            nothing: true,
            requirements: Vec::new(),
        }
    }

    pub fn from_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            nothing: false,
            requirements: labels
                .into_iter()
                .map(|(k, v)| Requirement::Equal(k.into(), v.into()))
                .collect(),
        }
    }

    pub fn from_requirement(requirement: Requirement) -> Self {
        Self {
            nothing: false,
            requirements: vec![requirement],
        }
    }

    pub fn from_label_selector(selector: Option<&metav1::LabelSelector>) -> Result<Self, Error> {
        let Some(selector) = selector else {
            return Ok(Self::nothing());
        };

        let mut requirements: Vec<Requirement> = selector
            .match_labels
            .iter()
            .flatten()
            .map(|(k, v)| Requirement::Equal(k.clone(), v.clone()))
            .collect();

        for expr in selector.match_expressions.iter().flatten() {
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return MissingValuesSnafu {
                        key: expr.key.clone(),
                        operator: expr.operator.clone(),
                    }
                    .fail();
                }
                "In" => Requirement::In(expr.key.clone(), values),
                "NotIn" => Requirement::NotIn(expr.key.clone(), values),
                "Exists" => Requirement::Exists(expr.key.clone()),
                "DoesNotExist" => Requirement::DoesNotExist(expr.key.clone()),
                other => {
                    return InvalidOperatorSnafu {
                        key: expr.key.clone(),
                        operator: other.to_string(),
                    }
                    .fail();
                }
            };
            requirements.push(requirement);
        }

        Ok(Self {
            nothing: false,
            requirements,
        })
    }

    pub fn is_nothing(&self) -> bool {
        self.nothing
    }

    pub fn is_everything(&self) -> bool {
        !self.nothing && self.requirements.is_empty()
    }

    /// Combines two selectors; the result matches what both match.
    pub fn and(&self, other: &Selector) -> Selector {
        if self.nothing || other.nothing {
            return Selector::nothing();
        }
        let mut requirements = self.requirements.clone();
        requirements.extend(other.requirements.iter().cloned());
        Selector {
            nothing: false,
            requirements,
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.nothing && self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&rendered.join(","))
    }
}
