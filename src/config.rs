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

use crate::operator::{DEFAULT_CUSTOM_RULE_GROUP, DEFAULT_RULES_NAMESPACE, OperatorOptions};
use crate::rules::duration;
use crate::rules::retry::RetryConfig;
use crate::rules::ruler::{DEFAULT_MAX_RESOURCE_SIZE, RulerOptions};
use clap::Args;
use std::collections::BTreeMap;
use std::time::Duration;

/// Options of the `server` command.
#[derive(Args, Clone, Debug)]
pub struct ServerArgs {
    /// Port the HTTP API listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Prometheus serving the builtin rules.
    #[arg(
        long,
        default_value = "http://prometheus-operated.kubesphere-monitoring-system.svc:9090"
    )]
    pub prometheus_endpoint: String,

    /// Thanos Ruler evaluating custom rules. Custom rule APIs are disabled
    /// when empty.
    #[arg(
        long,
        default_value = "http://thanos-ruler-operated.kubesphere-monitoring-system.svc:10902"
    )]
    pub thanos_ruler_endpoint: String,

    /// Namespace of the engines, the builtin rules and cluster level rules.
    #[arg(long, default_value = DEFAULT_RULES_NAMESPACE)]
    pub monitoring_namespace: String,

    /// Prometheus resource to use; the first one by name otherwise.
    #[arg(long)]
    pub prometheus_name: Option<String>,

    /// ThanosRuler resource to use; the first one by name otherwise.
    #[arg(long)]
    pub thanos_ruler_name: Option<String>,

    /// Labels of resources created for custom rules, as `k=v,k=v`.
    #[arg(
        long,
        default_value = "thanosruler=thanos-ruler,role=thanos-alerting-rules",
        value_parser = parse_labels
    )]
    pub custom_rule_resource_labels: BTreeMap<String, String>,

    #[arg(long, default_value = DEFAULT_CUSTOM_RULE_GROUP)]
    pub custom_rule_group: String,

    /// Upper bound on the serialized rules of one resource, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_RESOURCE_SIZE)]
    pub max_resource_size: usize,

    /// Attempts per write that loses an update race.
    #[arg(long, default_value_t = 5)]
    pub conflict_retries: usize,

    /// Deadline of a whole API request.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    /// Deadline of one rules endpoint query.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub query_timeout: Duration,
}

impl ServerArgs {
    pub fn operator_options(&self) -> OperatorOptions {
        OperatorOptions {
            rules_namespace: self.monitoring_namespace.clone(),
            custom_rule_group: self.custom_rule_group.clone(),
            custom_rule_resource_labels: self.custom_rule_resource_labels.clone(),
        }
    }

    pub fn ruler_options(&self) -> RulerOptions {
        RulerOptions {
            max_resource_size: self.max_resource_size,
            retry: RetryConfig {
                steps: self.conflict_retries.max(1),
                ..Default::default()
            },
        }
    }
}

fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(format!("label {pair:?} is not of the form key=value")),
        })
        .collect()
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    duration::parse(raw)
        .map(Duration::from_millis)
        .map_err(|e| e.to_string())
}
