//! Redis example: several instances sharing one quota ledger.
//!
//! Requires Redis at `QUOTA_REDIS_URL` (for example `redis://127.0.0.1/`):
//! `QUOTA_REDIS_URL=redis://127.0.0.1/ cargo run --example redis --features redis-storage`

use priority_quota::{QuotaConfig, QuotaService, SubmitRequest};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = QuotaConfig::from_env()?;

    // Two services over the same keys behave like two deployed instances.
    let first = QuotaService::connect(&config).await?;
    let second = QuotaService::connect(&config).await?;

    let run = format!("{}", std::process::id());
    for i in 0..4 {
        let service = if i % 2 == 0 { &first } else { &second };
        let request =
            SubmitRequest::priority("CRESOL DEMO").with_external_ref(format!("{}-{}", run, i));
        let outcome = service.submit(request).await?;
        println!(
            "instance {} -> {} ({}/{})",
            i % 2 + 1,
            outcome.kind(),
            outcome.total(),
            outcome.limit()
        );
    }

    for event in second.history("CRESOL DEMO").await? {
        println!("{}", serde_json::to_string(&event)?);
    }

    first.shutdown().await?;
    second.shutdown().await?;
    Ok(())
}
