#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use entitlement_adapter::{AdapterConfig, AppState};
use entitlement_engines::license::PolarLicenseAuthority;
use entitlement_kernel_contracts::{Clock, SystemClock};
use entitlement_storage::{InMemoryKvStore, KvStore};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const EXPIRY_SWEEP_SECS: u64 = 600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv = Arc::new(InMemoryKvStore::new(clock.clone()));
    let store: Arc<dyn KvStore> = kv.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(EXPIRY_SWEEP_SECS));
        loop {
            ticker.tick().await;
            match kv.purge_expired() {
                Ok(0) => {}
                Ok(dropped) => tracing::debug!(dropped, "expired kv rows purged"),
                Err(err) => tracing::warn!(error = %err, "kv expiry sweep failed"),
            }
        }
    });
    let authority = Arc::new(PolarLicenseAuthority::new(config.authority.clone()));
    let state = AppState::from_parts(&config, store, clock, authority);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        trial_days = config.entitlement.trial_days,
        monthly_quota = config.entitlement.monthly_quota_limit,
        min_client_version = %config.entitlement.min_client_version,
        "entitlement_http listening"
    );
    entitlement_adapter::serve(listener, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    tracing::info!("entitlement_http stopped");
    Ok(())
}
