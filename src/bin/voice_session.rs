//! Voice Session Application
//!
//! Runs one spoken session against the remote service using the default
//! microphone and speakers.
//!
//! Commands on stdin: `m` toggles the microphone, `e` ends the session,
//! `q` quits.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duplex_voice::{
    audio::{device::list_devices, CpalMicrophone, CpalOutput},
    config::AppConfig,
    network::{ws::WsConnector, Transport},
    protocol::Speaker,
    session::{Phase, SessionController, SessionEvent, SessionObserver},
};

/// Prints what a user would see on screen
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::PhaseChanged { to, .. } => println!("[{}]", to),
            SessionEvent::WaitingForCounterpart => println!("Waiting for the interviewer..."),
            SessionEvent::MicChanged { enabled } => {
                println!("Microphone {}", if *enabled { "on" } else { "off" })
            }
            SessionEvent::Transcript { speaker, text } => {
                let who = match speaker {
                    Speaker::Ai => "Interviewer",
                    Speaker::User => "You",
                };
                println!("{}: {}", who, text);
            }
            SessionEvent::Text(text) => println!("> {}", text),
            SessionEvent::Report(report) => {
                println!("\n=== Report ===");
                if let Some(score) = report.overall_score {
                    println!("  Overall: {}", score);
                }
                if let Some(verdict) = &report.verdict {
                    println!("  Verdict: {}", verdict);
                }
                if let Some(analysis) = &report.detailed_analysis {
                    println!("  {}", analysis);
                }
            }
            SessionEvent::RemoteError { message, credential } => match credential {
                Some(fault) => eprintln!("Error ({:?}): {}", fault, message),
                None => eprintln!("Error: {}", message),
            },
            SessionEvent::Ended { elapsed } => {
                println!("Session time: {}:{:02}", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
            }
            SessionEvent::LinkLost => eprintln!("Connection lost"),
            SessionEvent::AiSpeakingChanged { .. } => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config_path: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        if arg == "--list-devices" {
            print_devices();
            return Ok(());
        }
        config_path = Some(PathBuf::from(arg));
    }

    let config = AppConfig::load_or_default(config_path.as_deref()).context("failed to load config")?;
    tracing::info!(url = %config.transport.url, "Starting voice session");

    let params = config.session.to_start_session()?;
    let output = CpalOutput::open(config.playback.sample_rate).context("failed to open audio output")?;

    let controller = SessionController::new(
        params,
        &config,
        Arc::new(CpalMicrophone),
        Arc::new(output),
        Arc::new(ConsoleObserver),
    )?;

    let connector = WsConnector::new(config.transport.url.clone());
    controller.connect(&connector).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "m" => {
                        let enable = !controller.state().mic_enabled;
                        if let Err(e) = controller.set_mic_enabled(enable) {
                            eprintln!("{}", e);
                        }
                    }
                    "e" => {
                        if let Err(e) = controller.end_session() {
                            eprintln!("{}", e);
                        }
                    }
                    "q" => break,
                    "" => {}
                    other => eprintln!("Unknown command: {}", other),
                }
            }
        }
        if matches!(controller.current_phase(), Phase::Disconnected | Phase::Idle)
            || !controller.channel().is_connected()
        {
            break;
        }
    }

    if !matches!(controller.current_phase(), Phase::Disconnected | Phase::Idle) {
        let _ = controller.end_session();
    }
    controller.shutdown();
    tracing::info!("Voice session finished");
    Ok(())
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}
