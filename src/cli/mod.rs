//! CLI subcommand definitions and handlers.
//!
//! - `serve` (default) -- run the dial-in webhook server
//! - `normalize` -- show how a session body is interpreted
//! - `replay` -- drive a full session from a scripted event stream
//! - `check` -- report which credentials the environment is missing
//! - `version` -- print build/version info

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crate::config::Settings;
use crate::provision::PipecatCloudProvisioner;
use crate::server::{self, AppState};
use crate::session::{self, replay, ConversationPolicy};

/// Voice-call session orchestrator.
#[derive(Parser, Debug)]
#[command(
    name = "dialpilot",
    version = env!("CARGO_PKG_VERSION"),
    about = "Dial-in and dial-out call session orchestrator"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dial-in webhook server (default when no subcommand is given).
    Serve {
        /// Address to bind (default: HOST or 0.0.0.0).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (default: PORT or 7860).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the normalized call configuration and selected policy for a
    /// session body.
    Normalize {
        /// Path to the JSON session body.
        body: PathBuf,
    },

    /// Run a session against a JSON-lines event script and print what it did.
    Replay {
        /// Path to the JSON session body.
        #[arg(long)]
        body: PathBuf,

        /// Path to the JSON-lines event script.
        #[arg(long)]
        events: PathBuf,

        /// Pause between events in milliseconds.
        #[arg(long, default_value_t = 20)]
        step_ms: u64,
    },

    /// Check that the environment carries the credentials the server and
    /// the bot sessions need.
    Check,

    /// Print version, build date, and git commit information.
    Version,
}

/// Run the `serve` subcommand.
pub async fn handle_serve(
    settings: &Settings,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    settings.validate_for_server()?;
    let (Some(service), Some(api_key)) = (&settings.pipecat_service, &settings.pipecat_api_key)
    else {
        return Err("provisioning credentials missing".into());
    };

    let provisioner =
        PipecatCloudProvisioner::new(settings.pipecat_api_url.clone(), service, api_key);
    tracing::info!(?provisioner, "provisioner configured");
    let state = AppState {
        provisioner: Arc::new(provisioner),
    };

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| settings.host.clone()),
        port.unwrap_or(settings.port)
    );
    server::serve(&addr, state).await?;
    Ok(())
}

/// Run the `normalize` subcommand.
pub async fn handle_normalize(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let body = read_json(path).await?;
    let config = session::normalize(&body);
    let output = json!({
        "policy": ConversationPolicy::select(&config),
        "config": config,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run the `replay` subcommand.
pub async fn handle_replay(
    settings: &Settings,
    body: &Path,
    events: &Path,
    step_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = read_json(body).await?;
    let events = replay::load_events(events).await?;
    tracing::info!(events = events.len(), "replaying session");

    let outcome = replay::replay(
        &body,
        events,
        settings.session_options(),
        Duration::from_millis(step_ms),
    )
    .await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome.error {
        Some(error) => Err(format!("session failed: {}", error).into()),
        None => Ok(()),
    }
}

/// Run the `check` subcommand. Every role is reported before failing.
pub fn handle_check(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let roles = [
        ("server", settings.validate_for_server()),
        ("session", settings.validate_for_session()),
    ];
    let mut missing = 0;
    for (role, result) in &roles {
        match result {
            Ok(()) => println!("{:<8} ok", role),
            Err(e) => {
                missing += 1;
                println!("{:<8} {}", role, e);
            }
        }
    }
    if missing > 0 {
        return Err(format!("{} of {} roles not configured", missing, roles.len()).into());
    }
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("dialpilot {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("DIALPILOT_BUILD_DATE"));
    println!("  Git commit: {}", env!("DIALPILOT_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

async fn read_json(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_no_args_defaults_to_none() {
        let cli = Cli::try_parse_from(["dialpilot"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_overrides() {
        let cli = Cli::try_parse_from(["dialpilot", "serve", "--port", "8080"]).unwrap();
        match cli.command {
            Some(Command::Serve { host, port }) => {
                assert_eq!(host, None);
                assert_eq!(port, Some(8080));
            }
            other => panic!("Expected Serve, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_replay_args() {
        let cli = Cli::try_parse_from([
            "dialpilot",
            "replay",
            "--body",
            "body.json",
            "--events",
            "events.jsonl",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Replay {
                body,
                events,
                step_ms,
            }) => {
                assert_eq!(body, PathBuf::from("body.json"));
                assert_eq!(events, PathBuf::from("events.jsonl"));
                assert_eq!(step_ms, 20);
            }
            other => panic!("Expected Replay, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_replay_requires_events() {
        assert!(Cli::try_parse_from(["dialpilot", "replay", "--body", "b.json"]).is_err());
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["dialpilot", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }

    #[test]
    fn test_cli_check_subcommand() {
        let cli = Cli::try_parse_from(["dialpilot", "check"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Check)));
    }

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_check_fails_without_session_keys() {
        let settings = settings(&[("PIPECAT_API_KEY", "pk"), ("PIPECAT_SERVICE", "my-agent")]);
        let err = handle_check(&settings).unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 roles not configured");
    }

    #[test]
    fn test_check_passes_when_fully_configured() {
        let settings = settings(&[
            ("PIPECAT_API_KEY", "pk"),
            ("PIPECAT_SERVICE", "my-agent"),
            ("DAILY_API_KEY", "dk"),
            ("OPENAI_API_KEY", "ok"),
            ("CARTESIA_API_KEY", "ck"),
        ]);
        assert!(handle_check(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_normalize_reads_body_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.json");
        std::fs::write(&path, r#"{"dialout_settings": [{"phoneNumber": "+1"}]}"#).unwrap();
        assert!(handle_normalize(&path).await.is_ok());

        std::fs::write(&path, "not json").unwrap();
        assert!(handle_normalize(&path).await.is_err());
    }
}
