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


//! Client for the rules API exposed by Prometheus and Thanos Ruler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const RULES_PATH: &str = "api/v1/rules";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("invalid rule engine endpoint {endpoint:?}: {source}"))]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },

    #[snafu(display("failed to build http client: {source}"))]
    Build { source: reqwest::Error },

    #[snafu(display("request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("rule engine rejected the request ({status}): {message}"))]
    Client { status: u16, message: String },

    #[snafu(display("rule engine failed to serve the request ({status}): {message}"))]
    Server { status: u16, message: String },

    #[snafu(display("bad response from rule engine: {message}"))]
    BadResponse { message: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleGroup {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub rules: Vec<AlertingRule>,
}

/// A rule as evaluated by the engine, with its alerts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertingRule {
    #[serde(default)]
    pub state: String,
    pub name: String,
    pub query: String,
    /// The `for` clause in seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub evaluation_time: f64,
    #[serde(default)]
    pub last_evaluation: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub type_: String,
}

impl AlertingRule {
    pub fn is_alerting(&self) -> bool {
        self.type_.is_empty() || self.type_ == "alerting"
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<RulesData>,
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct RulesData {
    #[serde(default)]
    groups: Vec<RuleGroup>,
}

/// Source of the live alerting rules of one engine.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn alerting_rules(&self, matchers: &[String]) -> Result<Vec<RuleGroup>, Error>;
}

#[derive(Clone, Debug)]
pub struct RuleClient {
    http: reqwest::Client,
    url: Url,
}

impl RuleClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, Error> {
        let url = Url::parse(endpoint)
            .and_then(|mut base| {
                // keep any path prefix the endpoint is served under
                if !base.path().ends_with('/') {
                    let prefixed = format!("{}/", base.path());
                    base.set_path(&prefixed);
                }
                base.join(RULES_PATH)
            })
            .context(InvalidEndpointSnafu { endpoint })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(BuildSnafu)?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl RuleSource for RuleClient {
    /// Lists alerting rule groups, optionally narrowed by series matchers.
    async fn alerting_rules(&self, matchers: &[String]) -> Result<Vec<RuleGroup>, Error> {
        let mut query = vec![("type", "alert")];
        query.extend(matchers.iter().map(|m| ("match[]", m.as_str())));

        let response = self
            .http
            .get(self.url.clone())
            .query(&query)
            .send()
            .await
            .context(RequestSnafu {
                url: self.url.to_string(),
            })?;
        let status = response.status();
        let body = response.bytes().await.context(RequestSnafu {
            url: self.url.to_string(),
        })?;
        let parsed = serde_json::from_slice::<ApiResponse>(&body);

        if !status.is_success() {
            let message = match &parsed {
                Ok(resp) if !resp.error.is_empty() => {
                    format!("{}: {}", resp.error_type, resp.error)
                }
                _ => String::from_utf8_lossy(&body).into_owned(),
            };
            warn!(url = %self.url, %status, %message, "rules request failed");
            if status.is_client_error() {
                return ClientSnafu {
                    status: status.as_u16(),
                    message,
                }
                .fail();
            }
            if status.is_server_error() {
                return ServerSnafu {
                    status: status.as_u16(),
                    message,
                }
                .fail();
            }
            return BadResponseSnafu {
                message: format!("unexpected status {status}: {message}"),
            }
            .fail();
        }

        let parsed = parsed.map_err(|e| {
            BadResponseSnafu {
                message: format!("failed to decode rules response: {e}"),
            }
            .build()
        })?;
        if parsed.status != "success" {
            return BadResponseSnafu {
                message: format!("status {:?}: {}", parsed.status, parsed.error),
            }
            .fail();
        }

        let groups = parsed.data.map(|d| d.groups).unwrap_or_default();
        debug!(url = %self.url, groups = groups.len(), "fetched rule groups");
        Ok(groups)
    }
}
