//! Basic example: weekly priority quota for a handful of agencies.
//!
//! Run with `RUST_LOG=debug cargo run --example basic` to see each decision.

use priority_quota::{QuotaService, SubmitRequest};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let service = QuotaService::builder()
        .with_default_limit(2)
        .with_agency_limit("CRESOL PALMAS", 3)
        .without_background_reaper()
        .build_in_memory()?;

    println!("=== Weekly Priority Quota Example ===\n");
    println!("Default limit: 2 per week, CRESOL PALMAS: 3 per week\n");

    for (agency, process) in [
        ("Cresol Palmas", "proc-1"),
        ("cresol palmas", "proc-2"),
        ("CRESOL PALMAS", "proc-3"),
        ("CRESOL PALMAS", "proc-4"),
        ("Cresol Vera", "proc-5"),
        ("Cresol Vera", "proc-5"),
    ] {
        let request = SubmitRequest::priority(agency).with_external_ref(process);
        let outcome = service.submit(request).await?;
        println!(
            "{:<15} {:<7} -> {:<9} ({}/{})",
            agency,
            process,
            outcome.kind(),
            outcome.total(),
            outcome.limit()
        );
    }

    println!("\nSubmission without priority:");
    let outcome = service.submit(SubmitRequest::skip("Cresol Vera")).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    println!("\nCurrent usage:");
    for agency in ["CRESOL PALMAS", "CRESOL VERA"] {
        let status = service.query(agency).await?;
        println!("{}", serde_json::to_string(&status)?);
    }

    println!("\nMetrics: {}", serde_json::to_string(&service.metrics().snapshot())?);
    Ok(())
}
