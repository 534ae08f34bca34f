// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use skydomain::{
    config::{Args, ControllerConfig},
    constants::{
        CONFLICT_REQUEUE_DURATION_SECS, ERROR_REQUEUE_DURATION_SECS, KIND_CUSTOM_DOMAIN,
        KIND_CUSTOM_DOMAIN_REGISTRATION,
    },
    context::Context,
    crd::{CustomDomain, CustomDomainRegistration},
    errors::StoreError,
    metrics,
    reconcilers::{
        domain_for_registration, reconcile_customdomain, reconcile_registration,
        registrations_for_domain,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

impl ReconcileError {
    fn is_conflict(&self) -> bool {
        self.0
            .downcast_ref::<StoreError>()
            .is_some_and(StoreError::is_conflict)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads)
        .thread_name("skydomain-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    // Initialize logging with custom format
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Respects RUST_LOG_FORMAT environment variable for output format (text or json)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting custom domain controller");
    debug!("Logging initialized with file and line number tracking");

    let config = ControllerConfig::from_file(&args.config_file).with_context(|| {
        format!(
            "failed to load configuration from {}",
            args.config_file.display()
        )
    })?;
    debug!("Configuration loaded from {}", args.config_file.display());

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let ctx = Arc::new(Context::from_config(client.clone(), &config)?);

    info!("Starting all controllers");

    // Controllers should never exit - if one fails, we log it and exit the main process
    tokio::select! {
        result = run_customdomain_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: CustomDomain controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("CustomDomain controller exited unexpectedly without error")
        }
        result = run_registration_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: CustomDomainRegistration controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("CustomDomainRegistration controller exited unexpectedly without error")
        }
        result = run_metrics_server(args.metrics_addr) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping controllers");
            Ok(())
        }
    }
}

/// Run the `CustomDomain` controller
async fn run_customdomain_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting CustomDomain controller");

    let api = Api::<CustomDomain>::all(client.clone());
    let registrations = Api::<CustomDomainRegistration>::all(client);

    Controller::new(api, Config::default())
        .watches(registrations, Config::default(), |reg| {
            domain_for_registration(&reg)
        })
        .run(reconcile_customdomain_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `CustomDomainRegistration` controller
async fn run_registration_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting CustomDomainRegistration controller");

    let api = Api::<CustomDomainRegistration>::all(client.clone());
    let domains = Api::<CustomDomain>::all(client.clone());
    let ingresses = Api::<Ingress>::all(client);

    Controller::new(api, Config::default())
        .owns(ingresses, Config::default())
        .watches(domains, Config::default(), |domain| {
            registrations_for_domain(&domain)
        })
        .run(reconcile_registration_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Serve `/metrics` and `/healthz`
async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }));

    info!("Metrics server listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Reconcile wrapper for `CustomDomain`
async fn reconcile_customdomain_wrapper(
    domain: Arc<CustomDomain>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    debug!(
        domain = %domain.name_any(),
        "Reconcile wrapper called for CustomDomain"
    );

    match reconcile_customdomain(ctx, (*domain).clone()).await {
        Ok(action) => {
            metrics::record_reconciliation_success(KIND_CUSTOM_DOMAIN, start.elapsed());
            debug!("Successfully reconciled CustomDomain: {}", domain.name_any());
            Ok(action)
        }
        Err(e) => {
            metrics::record_reconciliation_error(KIND_CUSTOM_DOMAIN, start.elapsed());
            error!("Failed to reconcile CustomDomain {}: {:#}", domain.name_any(), e);
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `CustomDomainRegistration`
async fn reconcile_registration_wrapper(
    reg: Arc<CustomDomainRegistration>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    debug!(
        registration = %reg.name_any(),
        namespace = ?reg.namespace(),
        "Reconcile wrapper called for CustomDomainRegistration"
    );

    match reconcile_registration(ctx, (*reg).clone()).await {
        Ok(action) => {
            metrics::record_reconciliation_success(
                KIND_CUSTOM_DOMAIN_REGISTRATION,
                start.elapsed(),
            );
            debug!(
                "Successfully reconciled CustomDomainRegistration: {}/{}",
                reg.namespace().unwrap_or_default(),
                reg.name_any()
            );
            Ok(action)
        }
        Err(e) => {
            metrics::record_reconciliation_error(KIND_CUSTOM_DOMAIN_REGISTRATION, start.elapsed());
            error!(
                "Failed to reconcile CustomDomainRegistration {}/{}: {:#}",
                reg.namespace().unwrap_or_default(),
                reg.name_any(),
                e
            );
            Err(e.into())
        }
    }
}

/// Error policy shared by both controllers
fn error_policy<K>(_resource: Arc<K>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    if err.is_conflict() {
        warn!("Lost a write race, retrying: {}", err);
        return Action::requeue(Duration::from_secs(CONFLICT_REQUEUE_DURATION_SECS));
    }
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
