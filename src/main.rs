use clap::Parser;

use dialpilot::cli::{self, Cli, Command};
use dialpilot::config::Settings;
use dialpilot::logging::{self, LoggingConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; the real environment may carry everything.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    if let Some(Command::Version) = cli.command {
        cli::handle_version();
        return Ok(());
    }

    let _guard = logging::init(&LoggingConfig::from_env()?)?;
    let settings = Settings::from_env()?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        None => cli::handle_serve(&settings, None, None).await,
        Some(Command::Serve { host, port }) => cli::handle_serve(&settings, host, port).await,
        Some(Command::Normalize { body }) => cli::handle_normalize(&body).await,
        Some(Command::Replay {
            body,
            events,
            step_ms,
        }) => cli::handle_replay(&settings, &body, &events, step_ms).await,
        Some(Command::Check) => cli::handle_check(&settings),
        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}
