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

use crate::client::{RuleClient, RuleSource};
use crate::config::ServerArgs;
use crate::console::state::AppState;
use crate::context::Context;
use crate::operator::Operator;
use crate::rules::cache::RuleCache;
use crate::rules::file::OperatorRuleFileNaming;
use crate::rules::registry::RulerRegistry;
use crate::types::v1::prometheus::Prometheus;
use crate::types::v1::prometheus_rule::PrometheusRule;
use crate::types::v1::thanos_ruler::ThanosRuler;
use futures::StreamExt;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResourceExt;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod client;
pub mod config;
pub mod console;
mod context;
pub mod operator;
pub mod rules;
pub mod types;

#[cfg(test)]
mod tests;

pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let client = Client::try_default().await?;

    let (namespaces, namespace_writer) = reflector::store::<corev1::Namespace>();
    let namespace_watch = reflector(
        namespace_writer,
        watcher(
            Api::<corev1::Namespace>::all(client.clone()),
            watcher::Config::default(),
        ),
    )
    .default_backoff()
    .for_each(|res| async move {
        if let Err(e) = res {
            warn!("namespace watch failed: {}", e);
        }
    });

    let cache = Arc::new(RuleCache::new());
    let rule_watch = watcher(
        Api::<PrometheusRule>::all(client.clone()),
        watcher::Config::default(),
    )
    .default_backoff()
    .for_each(|res| {
        let cache = cache.clone();
        async move {
            match res {
                Ok(event) => cache.handle_event(event).await,
                Err(e) => warn!("rule resource watch failed: {}", e),
            }
        }
    });

    let store = Arc::new(Context::new(client.clone(), namespaces.clone()));
    let rulers = Arc::new(RulerRegistry::new(
        store,
        args.ruler_options(),
        args.prometheus_name.clone(),
        args.thanos_ruler_name.clone(),
    ));

    let prometheus_watch = watcher(
        Api::<Prometheus>::namespaced(client.clone(), &args.monitoring_namespace),
        watcher::Config::default(),
    )
    .default_backoff()
    .for_each(|res| {
        let rulers = rulers.clone();
        async move {
            match res {
                Ok(event) => rulers.handle_prometheus_event(event).await,
                Err(e) => warn!("prometheus watch failed: {}", e),
            }
        }
    });

    let thanos_ruler_watch = watcher(
        Api::<ThanosRuler>::namespaced(client.clone(), &args.monitoring_namespace),
        watcher::Config::default(),
    )
    .default_backoff()
    .for_each(|res| {
        let rulers = rulers.clone();
        async move {
            match res {
                Ok(event) => rulers.handle_thanos_ruler_event(event).await,
                Err(e) => warn!("thanos ruler watch failed: {}", e),
            }
        }
    });

    let prometheus: Arc<dyn RuleSource> = Arc::new(RuleClient::new(
        &args.prometheus_endpoint,
        args.query_timeout,
    )?);
    let thanos: Option<Arc<dyn RuleSource>> = if args.thanos_ruler_endpoint.is_empty() {
        None
    } else {
        Some(Arc::new(RuleClient::new(
            &args.thanos_ruler_endpoint,
            args.query_timeout,
        )?))
    };

    let operator = Operator::new(
        cache.clone(),
        rulers.clone(),
        prometheus,
        thanos,
        Arc::new(OperatorRuleFileNaming),
        args.operator_options(),
    );
    let state = AppState::new(Arc::new(operator));

    let ready_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = namespaces.wait_until_ready().await {
            warn!("namespace cache never synced: {}", e);
            return;
        }
        ready_state.ready_when_synced().await;
        info!("namespace, rule resource and rule engine caches synced");
    });

    tokio::select! {
        _ = namespace_watch => warn!("namespace watch ended"),
        _ = rule_watch => warn!("rule resource watch ended"),
        _ = prometheus_watch => warn!("prometheus watch ended"),
        _ = thanos_ruler_watch => warn!("thanos ruler watch ended"),
        res = console::server::run(args.port, state, args.request_timeout) => res?,
    }

    Ok(())
}

/// Writes the definitions of the resources the engine reads.
pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    let documents = [
        serde_yaml_ng::to_string(&PrometheusRule::crd())?,
        serde_yaml_ng::to_string(&Prometheus::crd())?,
        serde_yaml_ng::to_string(&ThanosRuler::crd())?,
    ];
    writer
        .write_all(documents.join("---\n").as_bytes())
        .await?;
    writer.flush().await?;

    Ok(())
}
