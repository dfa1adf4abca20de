use anyhow::{Context, Result};
use forecast_consensus_engine::consensus::StaticRegistry;
use forecast_consensus_engine::core::{logging, EngineConfig};
use forecast_consensus_engine::pipeline::{RoundInput, RoundProcessor};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::from_env()?;

    // Initialize logging
    logging::init_logging(&config.monitoring.log_level);

    tracing::info!("🚀 Forecast consensus engine starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        tracing::warn!("No round files given. Usage: forecast-consensus-engine <round.json>...");
        return Ok(());
    }

    let processor = Arc::new(RoundProcessor::new(
        config,
        Arc::new(StaticRegistry::standard()),
    )?);

    tracing::info!("📥 Processing {} round file(s)", paths.len());

    let mut failed = 0;
    for (path, result) in run_rounds(processor.clone(), paths).await {
        match result {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                failed += 1;
                tracing::error!("❌ Round file {} failed: {:#}", path, e);
            }
        }
    }

    processor.metrics().log_report();

    if failed > 0 {
        anyhow::bail!("{} round file(s) failed", failed);
    }
    tracing::info!("✅ All rounds processed");

    Ok(())
}

/// Settles every round file concurrently; results keep the input order and
/// one bad file never stops the others.
async fn run_rounds(
    processor: Arc<RoundProcessor>,
    paths: Vec<String>,
) -> Vec<(String, Result<String>)> {
    let handles: Vec<_> = paths
        .into_iter()
        .map(|path| {
            let processor = processor.clone();
            let task_path = path.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let round = RoundInput::from_file(&task_path)
                    .with_context(|| format!("loading round file {}", task_path))?;
                let outcome = processor.process(&round);
                Ok::<_, anyhow::Error>(outcome.to_json()?)
            });
            (path, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (path, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("round task panicked")),
        };
        results.push((path, result));
    }
    results
}
