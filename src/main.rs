// MIT License - Copyright (c) 2026 Peter Wright
// JSON-lines bridge

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use unii_lan_bridge::{
    EventReceiver, Input, PanelConfig, PanelEvent, ProtocolGeneration, ReconnectPolicy, SectionArmedState,
    Snapshot, UniiPanel,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "unii-bridge")]
#[command(about = "Bridge between a UNii alarm panel and JSON lines on stdout")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

/// One-shot operations; without one the bridge runs until signalled.
#[derive(Subcommand)]
enum CliCommand {
    /// Poll once and print the snapshot
    Status,
    /// Arm a section
    Arm {
        section: u16,
        /// User code (defaults to the configured one)
        #[arg(long)]
        code: Option<String>,
    },
    /// Disarm a section
    Disarm {
        section: u16,
        #[arg(long)]
        code: Option<String>,
    },
    /// Bypass an input
    Bypass {
        input: u16,
        #[arg(long)]
        code: Option<String>,
    },
    /// Remove an input bypass
    Unbypass {
        input: u16,
        #[arg(long)]
        code: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    #[serde(default, deserialize_with = "deserialize_section_names")]
    section_names: HashMap<u16, String>,
}

fn deserialize_section_names<'de, D>(deserializer: D) -> Result<HashMap<u16, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let string_map: HashMap<String, String> = HashMap::deserialize(deserializer)?;
    string_map
        .into_iter()
        .map(|(k, v)| {
            k.parse::<u16>()
                .map(|id| (id, v))
                .map_err(|_| serde::de::Error::custom(format!("invalid section ID: {k}")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    panel_ip: String,
    #[serde(default = "default_panel_port")]
    panel_port: u16,
    /// Omit for a cleartext panel
    #[serde(default)]
    shared_key: Option<String>,
    /// "standard" or "legacy"
    #[serde(default = "default_generation")]
    generation: String,
    #[serde(default)]
    user_code: Option<String>,
    /// "persistent" or "per_poll"
    #[serde(default = "default_reconnect_policy")]
    reconnect_policy: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
    #[serde(default = "default_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_timeout")]
    request_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay")]
    max_reconnect_delay_ms: u64,
    #[serde(default)]
    max_reconnect_attempts: Option<u32>,
}

fn default_panel_port() -> u16 {
    6502
}
fn default_generation() -> String {
    "standard".to_string()
}
fn default_reconnect_policy() -> String {
    "persistent".to_string()
}
fn default_poll_interval() -> u64 {
    5000
}
fn default_timeout() -> u64 {
    5000
}
fn default_reconnect_delay() -> u64 {
    1000
}
fn default_max_reconnect_delay() -> u64 {
    60000
}

fn build_panel_config(toml: &PanelToml) -> Result<PanelConfig> {
    let generation: ProtocolGeneration = toml.generation.parse()?;
    let policy: ReconnectPolicy = toml.reconnect_policy.parse()?;

    let mut builder = PanelConfig::builder()
        .panel_ip(&toml.panel_ip)
        .panel_port(toml.panel_port)
        .generation(generation)
        .reconnect_policy(policy)
        .poll_interval_ms(toml.poll_interval_ms)
        .connect_timeout_ms(toml.connect_timeout_ms)
        .request_timeout_ms(toml.request_timeout_ms)
        .reconnect_delay_ms(toml.reconnect_delay_ms)
        .max_reconnect_delay_ms(toml.max_reconnect_delay_ms)
        .max_reconnect_attempts(toml.max_reconnect_attempts);
    if let Some(key) = &toml.shared_key {
        builder = builder.shared_key(key);
    }
    if let Some(code) = &toml.user_code {
        builder = builder.user_code(code);
    }

    let config = builder.build();
    config.validate()?;
    Ok(config)
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

// ---------------------------------------------------------------------------
// Output JSON types
// ---------------------------------------------------------------------------

// All lines share a flat {now, op, ...} structure

#[derive(Serialize)]
struct SnapshotLine<'a> {
    now: u64,
    op: &'static str,
    sections: Vec<SectionLine<'a>>,
    inputs: &'a [Input],
}

#[derive(Serialize)]
struct SectionLine<'a> {
    id: u16,
    name: &'a str,
    armed: bool,
    armed_state: SectionArmedState,
}

#[derive(Serialize)]
struct SectionEventLine {
    now: u64,
    op: &'static str,
    section_id: u16,
    old_state: Option<SectionArmedState>,
    new_state: SectionArmedState,
}

#[derive(Serialize)]
struct SimpleEventLine {
    now: u64,
    op: &'static str,
}

#[derive(Serialize)]
struct CmdAckLine {
    now: u64,
    op: &'static str,
    cmd: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn emit_json(payload: &impl Serialize) {
    match serde_json::to_string(payload) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize output line: {e}"),
    }
}

fn emit_snapshot(snapshot: &Snapshot, names: &HashMap<u16, String>) {
    let sections = snapshot
        .sections
        .iter()
        .map(|s| SectionLine {
            id: s.id,
            name: names.get(&s.id).map(String::as_str).unwrap_or(&s.name),
            armed: s.is_armed(),
            armed_state: s.armed_state,
        })
        .collect();
    emit_json(&SnapshotLine {
        now: now_epoch_ms(),
        op: "SNAPSHOT",
        sections,
        inputs: &snapshot.inputs,
    });
}

fn emit_simple(op: &'static str) {
    emit_json(&SimpleEventLine {
        now: now_epoch_ms(),
        op,
    });
}

/// Whether two snapshots differ in anything but their timestamp.
fn content_changed(previous: Option<&Snapshot>, next: &Snapshot) -> bool {
    previous.is_none_or(|p| p.sections != next.sections || p.inputs != next.inputs)
}

// ---------------------------------------------------------------------------
// Panel event handler
// ---------------------------------------------------------------------------

async fn forward_events(mut rx: EventReceiver, names: Arc<HashMap<u16, String>>) {
    let mut last: Option<Arc<Snapshot>> = None;
    loop {
        match rx.recv().await {
            Ok(PanelEvent::SnapshotPublished(snapshot)) => {
                if content_changed(last.as_deref(), &snapshot) {
                    emit_snapshot(&snapshot, &names);
                }
                last = Some(snapshot);
            }
            Ok(PanelEvent::SectionStateChanged {
                section_id,
                old_state: Some(old_state),
                new_state,
            }) => {
                emit_json(&SectionEventLine {
                    now: now_epoch_ms(),
                    op: "SECTION_CHANGED",
                    section_id,
                    old_state: Some(old_state),
                    new_state,
                });
            }
            Ok(PanelEvent::SectionStateReported { section_id, state }) => {
                emit_json(&SectionEventLine {
                    now: now_epoch_ms(),
                    op: "SECTION_REPORTED",
                    section_id,
                    old_state: None,
                    new_state: state,
                });
            }
            Ok(PanelEvent::Connected) => emit_simple("CONNECTED"),
            Ok(PanelEvent::Disconnected) => {
                warn!("Panel disconnected, waiting for reconnection");
                emit_simple("DISCONNECTED");
            }
            Ok(PanelEvent::Faulted) => {
                error!("Panel session faulted; restart or send SIGHUP");
                emit_simple("FAULTED");
            }
            Ok(PanelEvent::CatalogDiscovered { sections, inputs }) => {
                info!("Catalog: {sections} sections, {inputs} published inputs");
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event receiver lagged, missed {n} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                info!("Event channel closed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot commands
// ---------------------------------------------------------------------------

async fn run_command(panel: &UniiPanel, command: CliCommand, names: &HashMap<u16, String>) -> bool {
    let stored = panel.config().user_code.clone();
    let resolve = |code: Option<String>| {
        code.or_else(|| stored.clone())
            .context("No user code given and none configured")
    };

    let (label, result): (String, Result<()>) = match command {
        CliCommand::Status => {
            return match panel.poll_now().await {
                Ok(snapshot) => {
                    emit_snapshot(&snapshot, names);
                    true
                }
                Err(e) => {
                    error!("Status poll failed: {e}");
                    false
                }
            };
        }
        CliCommand::Arm { section, code } => (
            format!("ARM {section}"),
            match resolve(code) {
                Ok(code) => panel.arm_section_with_code(section, &code).await.map_err(Into::into),
                Err(e) => Err(e),
            },
        ),
        CliCommand::Disarm { section, code } => (
            format!("DISARM {section}"),
            match resolve(code) {
                Ok(code) => panel.disarm_section(section, &code).await.map_err(Into::into),
                Err(e) => Err(e),
            },
        ),
        CliCommand::Bypass { input, code } => (
            format!("BYPASS {input}"),
            match resolve(code) {
                Ok(code) => panel.bypass_input(input, &code).await.map_err(Into::into),
                Err(e) => Err(e),
            },
        ),
        CliCommand::Unbypass { input, code } => (
            format!("UNBYPASS {input}"),
            match resolve(code) {
                Ok(code) => panel.unbypass_input(input, &code).await.map_err(Into::into),
                Err(e) => Err(e),
            },
        ),
    };

    let success = result.is_ok();
    match &result {
        Ok(()) => info!("{label}: success"),
        Err(e) => error!("{label} failed: {e}"),
    }
    emit_json(&CmdAckLine {
        now: now_epoch_ms(),
        op: "CMD_ACK",
        cmd: label,
        success,
        error: result.err().map(|e| e.to_string()),
    });
    success
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=unii_lan_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt()
            .without_time()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
    }

    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let mut panel_config = build_panel_config(&config.panel)?;
    let mut section_names = Arc::new(config.section_names);

    if let Some(command) = cli.command {
        let mut panel = UniiPanel::connect(panel_config)
            .await
            .context("Failed to connect to panel")?;
        let success = run_command(&panel, command, &section_names).await;
        if let Err(e) = panel.disconnect().await {
            warn!("Error disconnecting panel: {e}");
        }
        if !success {
            anyhow::bail!("Command failed");
        }
        return Ok(());
    }

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        info!(
            "Connecting to UNii panel at {}:{}",
            panel_config.panel_ip, panel_config.panel_port
        );
        let mut panel = UniiPanel::connect(panel_config.clone()).await?;
        info!("Panel connected and initialized");

        if let Some(snapshot) = panel.latest_snapshot() {
            emit_snapshot(&snapshot, &section_names);
        }

        let event_handle = tokio::spawn(forward_events(panel.subscribe(), Arc::clone(&section_names)));

        // Wait for a signal
        info!("Bridge running. Send SIGHUP to reload, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and reconnecting...");
                true
            }
        };

        if let Err(e) = panel.disconnect().await {
            warn!("Error disconnecting panel: {e}");
        }
        event_handle.abort();

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match build_panel_config(&new_config.panel) {
                Ok(new_panel_config) => {
                    panel_config = new_panel_config;
                    section_names = Arc::new(new_config.section_names);
                    info!("Config reloaded successfully");
                }
                Err(e) => warn!("Invalid panel config in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            panel_ip = "10.0.0.5"
            "#,
        )
        .unwrap();
        let panel = build_panel_config(&config.panel).unwrap();
        assert_eq!(panel.panel_port, 6502);
        assert_eq!(panel.generation, ProtocolGeneration::Standard);
        assert_eq!(panel.reconnect_policy, ReconnectPolicy::Persistent);
        assert!(panel.shared_key.is_none());
        assert!(config.section_names.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            panel_ip = "10.0.0.5"
            shared_key = "secret12"
            generation = "legacy"
            user_code = "1234"
            reconnect_policy = "per_poll"
            poll_interval_ms = 10000
            max_reconnect_attempts = 5

            [section_names]
            1 = "Ground floor"
            "#,
        )
        .unwrap();
        let panel = build_panel_config(&config.panel).unwrap();
        assert_eq!(panel.generation, ProtocolGeneration::Legacy);
        assert_eq!(panel.reconnect_policy, ReconnectPolicy::PerPoll);
        assert_eq!(panel.max_reconnect_attempts, Some(5));
        assert_eq!(panel.poll_interval_ms, 10000);
        assert_eq!(config.section_names.get(&1).unwrap(), "Ground floor");
    }

    #[test]
    fn test_invalid_generation_rejected() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            panel_ip = "10.0.0.5"
            generation = "quantum"
            "#,
        )
        .unwrap();
        assert!(build_panel_config(&config.panel).is_err());
    }

    #[test]
    fn test_invalid_section_name_key() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [panel]
            panel_ip = "10.0.0.5"

            [section_names]
            first = "Ground floor"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_content_changed_ignores_timestamp() {
        let a = Snapshot {
            taken_at: Utc::now(),
            sections: Vec::new(),
            inputs: Vec::new(),
        };
        let mut b = a.clone();
        b.taken_at = Utc::now() + chrono::Duration::seconds(5);
        assert!(content_changed(None, &a));
        assert!(!content_changed(Some(&a), &b));
    }
}
