use std::env;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use ramp_loadtest::report::generate_report;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let input = PathBuf::from(
        env::args()
            .nth(1)
            .unwrap_or_else(|| "results.json".to_string()),
    );

    match generate_report(&input) {
        Ok(output) => {
            println!("✅ HTML report generated!");
            println!("📄 Report: {}", output.display());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
