//! Remediation Controller
//!
//! Keeps flagged Deployments in line with their namespace's `Configuration`:
//! - Configuration passes copy the desired image tag, port, security flags and
//!   resources onto Deployments marked `anaisurl.com/misconfiguration: "true"`
//! - Aging passes re-arm remediated Deployments once the cooldown has elapsed

mod backoff;
mod config;
mod controller;
mod error;
mod marker;
mod reconciler;
mod test_utils;
mod watcher;
mod workload;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Remediation Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Aging threshold: {}s", config.aging_threshold.as_secs());
    info!("  Success requeue: {}s", config.success_interval.as_secs());
    info!("  Pass timeout: {}s", config.pass_timeout.as_secs());
    info!("  Healthy condition: {}", config.healthy_condition);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
