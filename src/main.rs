use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use matchlift::config::EngineConfig;
use matchlift::error::{EngineError, Result};
use matchlift::forecast::CancelToken;
use matchlift::pipeline::{run_analysis, AnalysisRequest};

#[tokio::main]
async fn main() {
    let cfg = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: EngineConfig) -> Result<()> {
    let input = cfg
        .input_path
        .clone()
        .ok_or_else(|| EngineError::Config("MATCHLIFT_INPUT must be set".to_string()))?;
    let raw = tokio::fs::read_to_string(&input).await?;
    let request: AnalysisRequest = serde_json::from_str(&raw)?;
    info!(
        input = %input,
        observations = request.observations.len(),
        series = request.series.len(),
        "loaded analysis request"
    );

    // Ctrl-C stops the batch between pair fits
    let cancel = CancelToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling remaining forecasts");
            signal_cancel.cancel();
        }
    });

    let report = run_analysis(request, &cfg, &cancel).await?;
    let json = serde_json::to_string_pretty(&report)?;

    match &cfg.output_path {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            info!(output = %path, pairs = report.pairs.len(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
