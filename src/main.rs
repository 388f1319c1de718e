//! OpenFGA Operator - keeps OpenFGA stores and models in sync with Kubernetes

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use openfga_operator::config::OperatorConfig;
use openfga_operator::controller::Context;
use openfga_operator::crd::{Model, OpenFGAStore, Store};
use openfga_operator::fga::HttpFgaClient;
use openfga_operator::health::{self, HealthState};
use openfga_operator::leader::LeaderElector;
use openfga_operator::metrics;
use openfga_operator::retry::{retry_with_backoff, RetryConfig};
use openfga_operator::validation::{load_bundle, validate_bundle};
use openfga_operator::{runner, FIELD_MANAGER, LEADER_LEASE_NAME};

/// OpenFGA Operator - manages OpenFGA stores and authorization models from Kubernetes
#[derive(Parser, Debug)]
#[command(name = "openfga-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default)
    Controller,
    /// Validate an OpenFGAStore bundle or OpenFGA store file offline
    Validate {
        /// Bundle to validate
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if cli.crd {
        for crd in [Store::crd(), Model::crd(), OpenFGAStore::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Validate { file }) => run_validate(file),
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,openfga_operator=debug,kube=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn run_validate(file: PathBuf) -> anyhow::Result<()> {
    let base_dir = file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let bundle = load_bundle(&file)?;
    let report = validate_bundle(&bundle, &base_dir)?;

    for issue in &report.issues {
        eprintln!("{issue}");
    }
    if !report.is_ok() {
        anyhow::bail!("{}: {} issue(s) found", file.display(), report.issues.len());
    }
    println!(
        "{}: ok ({} tuples, {} tests)",
        file.display(),
        report.tuples,
        report.tests
    );
    Ok(())
}

/// Server-side apply every CRD, retrying until the API server accepts it
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::infinite();

    for crd in [Store::crd(), Model::crd(), OpenFGAStore::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        let (crds, params, crd) = (&crds, &params, &crd);
        let name_ref = name.as_str();
        retry_with_backoff(&retry, "install_crd", || async move {
            crds.patch(name_ref, params, &Patch::Apply(crd)).await
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    tracing::info!("All OpenFGA CRDs installed/updated");
    Ok(())
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(openfga_url = %config.openfga_url, "Starting OpenFGA operator");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let health_state = HealthState::default();
    let health_addr = config.health_addr()?;
    let readiness = health_state.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_addr, readiness).await {
            tracing::error!(error = %e, "Health endpoint stopped");
        }
    });

    if config.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let fga = Arc::new(HttpFgaClient::from_config(&config)?);
    let ctx = Arc::new(Context::builder(client.clone(), fga).build());

    if let Some(metrics_addr) = config.metrics_addr()? {
        let counters = ctx.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(metrics_addr, counters).await {
                tracing::error!(error = %e, "Metrics endpoint stopped");
            }
        });
    }

    let mut guard = if config.leader_elect {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &config.leader_election_namespace,
            &config.identity(),
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    tracing::info!("Starting controllers:");
    let controllers = runner::build_controllers(client, ctx);
    health_state.set_ready(true);

    let run_all = futures::future::join_all(controllers);
    match guard.as_mut() {
        Some(guard) => {
            tokio::select! {
                _ = run_all => {
                    tracing::info!("Controllers stopped");
                }
                _ = guard.lost() => {
                    health_state.set_ready(false);
                    anyhow::bail!("Leadership lost, shutting down");
                }
            }
            if let Err(e) = guard.release_leadership().await {
                tracing::warn!(error = %e, "Failed to release leadership");
            }
        }
        None => {
            run_all.await;
            tracing::info!("Controllers stopped");
        }
    }

    Ok(())
}
