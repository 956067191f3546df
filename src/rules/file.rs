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


//! Mapping between rule files loaded by an engine and the resources they
//! were generated from.

/// Decides whether a rule file reported by an engine was generated from a
/// given PrometheusRule resource.
pub trait RuleFileNaming: Send + Sync {
    fn is_resource_file(
        &self,
        file: &str,
        namespace: &str,
        resource_name: &str,
        resource_uid: Option<&str>,
    ) -> bool;
}

/// The prometheus-operator layout: `<dir>/<namespace>-<name>.<ext>`, with
/// newer operator versions appending `-<uid>` to the stem.
#[derive(Clone, Copy, Debug, Default)]
pub struct OperatorRuleFileNaming;

impl RuleFileNaming for OperatorRuleFileNaming {
    fn is_resource_file(
        &self,
        file: &str,
        namespace: &str,
        resource_name: &str,
        resource_uid: Option<&str>,
    ) -> bool {
        let base = file.rsplit('/').next().unwrap_or(file);
        let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
        let expected = format!("{namespace}-{resource_name}");
        if stem == expected {
            return true;
        }
        resource_uid.is_some_and(|uid| stem == format!("{expected}-{uid}"))
    }
}
