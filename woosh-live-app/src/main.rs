//! `woosh-live`: headless host for the Woosh Cafe live voice assistant.
//!
//! Loads settings, opens one live session for the chosen role, and runs it
//! until Ctrl+C or until the session ends on its own.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use woosh_live_core::{
    engine::persona::DEFAULT_BASE_INSTRUCTION, list_input_devices, list_output_devices,
    CpalCapture, LiveAssistant, LiveStatus, LoopbackTransport, OutputDevice, Persona, Role,
    VirtualOutput, WebSocketTransport,
};

use settings::{default_settings_path, load_settings, save_settings, AppSettings};

#[derive(Debug, Parser)]
#[command(name = "woosh-live", version, about = "Woosh Cafe live voice assistant")]
struct Cli {
    /// Who is talking: guest or owner.
    #[arg(long)]
    role: Option<Role>,

    /// Settings file (defaults to the per-user data directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Capture device name, as printed by --list-devices.
    #[arg(long)]
    input_device: Option<String>,

    /// Loopback transport and silent output: exercises the microphone
    /// path without a network connection.
    #[arg(long)]
    dry_run: bool,

    /// Print audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

impl Cli {
    fn apply(&self, settings: &mut AppSettings) {
        if let Some(role) = self.role {
            settings.role = role;
        }
        if let Some(device) = self.input_device.clone() {
            settings.preferred_input_device = Some(device);
        }
        settings.normalize();
    }
}

fn print_devices() {
    for device in list_input_devices().into_iter().chain(list_output_devices()) {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{:?}\t{}{marker}", device.direction, device.name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "woosh_live=info,woosh_live_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    let path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&path);
    cli.apply(&mut settings);
    if cli.save_settings {
        save_settings(&path, &settings)
            .with_context(|| format!("failed to save settings to {}", path.display()))?;
        info!(path = %path.display(), "settings saved");
    }
    info!(
        settings = %serde_json::to_string(&settings.runtime_settings())?,
        "woosh-live starting"
    );

    let config = settings.live_config();
    let assistant = if cli.dry_run {
        info!("dry run: loopback transport, virtual output");
        let capture = Arc::new(CpalCapture::new(config.preferred_input_device.clone()));
        let output = VirtualOutput::new(config.output_sample_rate);
        LiveAssistant::new(
            config,
            capture,
            Arc::new(LoopbackTransport),
            Arc::new(move || -> woosh_live_core::Result<Arc<dyn OutputDevice>> {
                Ok(Arc::new(output.clone()))
            }),
        )
    } else {
        let key = settings
            .resolve_api_key(|name| std::env::var(name).ok())
            .context("no API key: set WOOSH_LIVE_API_KEY or GEMINI_API_KEY, or apiKey in the settings file")?;
        let transport = WebSocketTransport::new(key)?;
        LiveAssistant::with_default_devices(config, Arc::new(transport))
    };

    let persona = Persona {
        role: settings.role,
        base_instruction: settings
            .base_instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_INSTRUCTION.to_string()),
    };

    let mut status_rx = assistant.subscribe_status();
    assistant
        .start_session(persona)
        .await
        .context("failed to start live session")?;
    info!(role = ?settings.role, "live session running, press Ctrl+C to stop");

    let ended = async {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    info!(status = %event.status, detail = ?event.detail, "status");
                    if matches!(event.status, LiveStatus::Idle | LiveStatus::Error) {
                        return event;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "status events lagged"),
                Err(RecvError::Closed) => {
                    return woosh_live_core::LiveStatusEvent {
                        status: LiveStatus::Idle,
                        detail: None,
                    }
                }
            }
        }
    };

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            None
        }
        event = ended => Some(event),
    };

    assistant.stop_session().await;
    info!(
        diagnostics = %serde_json::to_string(&assistant.diagnostics_snapshot())?,
        "live session finished"
    );

    match outcome {
        Some(event) if event.status == LiveStatus::Error => Err(anyhow::anyhow!(
            "live session failed: {}",
            event.detail.unwrap_or_else(|| "unknown error".into())
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "woosh-live",
            "--role",
            "owner",
            "--input-device",
            " Desk Mic ",
            "--dry-run",
        ]);
        assert!(cli.dry_run);

        let mut settings = AppSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.role, Role::Owner);
        assert_eq!(settings.preferred_input_device.as_deref(), Some("Desk Mic"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(Cli::try_parse_from(["woosh-live", "--role", "chef"]).is_err());
    }
}
