//! Background reaper example with the full agency limit table.
//!
//! Reads the usual `QUOTA_*` environment variables, so for example
//! `QUOTA_REAP_INTERVAL_SECS=1 QUOTA_RETENTION_DAYS=14 cargo run --example background_reaper`.

use priority_quota::{QuotaConfig, QuotaServiceBuilder, SubmitRequest};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AGENCY_LIMITS: [(&str, u32); 8] = [
    ("CRESOL CORONEL VIVIDA", 5),
    ("CRESOL HONORIO SERPA", 3),
    ("CRESOL MANGUEIRINHA", 5),
    ("CRESOL PALMAS", 3),
    ("CRESOL PATO BRANCO", 5),
    ("CRESOL TAPURAH", 2),
    ("CRESOL COLÍDER", 2),
    ("CRESOL CONECTA", 3),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = QuotaConfig::from_env()?;
    if config.agency_limits.is_empty() {
        config.agency_limits = AGENCY_LIMITS
            .iter()
            .map(|(agency, limit)| (agency.to_string(), *limit))
            .collect();
    }
    if std::env::var("QUOTA_REAP_INTERVAL_SECS").is_err() {
        config.reap_interval = Some(Duration::from_secs(1));
    }

    let service = QuotaServiceBuilder::from_config(&config)
        .with_max_records(1000)
        .build_in_memory()?;

    for (agency, _) in AGENCY_LIMITS {
        for attempt in 0..6 {
            let request =
                SubmitRequest::priority(agency).with_external_ref(format!("{}-{}", agency, attempt));
            let outcome = service.submit(request).await?;
            if outcome.is_denied() {
                println!(
                    "{:<22} limit {} reached after {} grants",
                    agency,
                    outcome.limit(),
                    outcome.total()
                );
                break;
            }
        }
    }

    // Let the reaper tick a few times; nothing is old enough to delete yet.
    tokio::time::sleep(Duration::from_secs(3)).await;
    println!("\nStore: {}", serde_json::to_string(&service.status().await?)?);

    service.shutdown().await?;
    Ok(())
}
