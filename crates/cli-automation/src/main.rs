use std::path::PathBuf;

use clap::Parser;
use log::error;
use tonwerk::automation::{self, RunOutcome};
use tonwerk::error::PreflightError;

/// Nightly batch runner: watch folder in, finished exports (or quarantine
/// jobs) out.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
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
    match automation::run(&args.settings, &args.rules).await {
        Ok(RunOutcome::Completed(report_path)) => {
            // Report path on stdout for callers (GUI, test harness).
            println!("{}", report_path.display());
        }
        Ok(RunOutcome::AlreadyRunning) | Ok(RunOutcome::Disabled) => {}
        Err(err) => {
            error!("automation run failed: {err:#}");
            let code = err
                .downcast_ref::<PreflightError>()
                .map(PreflightError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}
