use std::path::PathBuf;

use clap::Parser;
use log::error;
use tonwerk::error::PreflightError;
use tonwerk::worker;

/// Retry a single quarantine job from today's ledger.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Exact quarantine job id; picks the first waiting job when omitted
    #[arg(long)]
    job_id: Option<String>,

    /// Path to settings.json (or .toml)
    #[arg(long, default_value = "portable_data/config/settings.json")]
    settings: PathBuf,

    /// Path to automation_rules.json
    #[arg(long, default_value = "portable_data/config/automation_rules.json")]
    rules: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    match worker::run(args.job_id.as_deref(), &args.settings, &args.rules).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("quarantine worker failed: {err:#}");
            let code = err
                .downcast_ref::<PreflightError>()
                .map(PreflightError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}
