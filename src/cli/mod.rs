//! Command-line interface.

pub mod commands;
pub mod display;
pub mod output;
pub mod types;

pub use types::{Cli, Commands, StrategyArg};

use crate::domain::models::Config;
use crate::infrastructure::logging::scrub_secrets;

/// Run the parsed command against a loaded configuration.
pub async fn dispatch(command: Commands, config: &Config, json_mode: bool) -> anyhow::Result<()> {
    match command {
        Commands::Merge {
            input,
            output,
            strategy,
            catalog,
        } => commands::merge::execute(&input, output, strategy, catalog, config, json_mode).await,
        Commands::Candidates { input } => commands::candidates::execute(&input, config, json_mode),
        Commands::Report { original, merged } => {
            commands::report::execute(&original, &merged, config, json_mode)
        }
    }
}

/// Print `err` with its causes and exit non-zero.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    let message = scrub_secrets(&format!("{err:#}")).into_owned();
    if json_mode {
        let body = serde_json::json!({ "success": false, "error": message });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {message}");
    }
    std::process::exit(1)
}
