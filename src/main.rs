use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use coach_realtime::config::ClientConfig;
use coach_realtime::core::audio::{WavFileInput, WavFileOutput};
use coach_realtime::core::realtime::{
    AudioOutput, HostCapabilities, NullAudioOutput, PracticeScenario, RealtimeVoice,
    SessionConfig, SessionController, SessionError, SessionErrorCallback, SessionState,
    StateChangeCallback, TranscriptCallback, TranscriptEntry, TransportKind, WebRtcPeerConnector,
};

/// Coach Realtime - practice conversations with a realtime voice model
#[derive(Parser, Debug)]
#[command(name = "coach-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one practice session, streaming a WAV file as the microphone
    Run {
        /// Microphone recording (16-bit PCM mono, 24kHz)
        #[arg(short = 'i', long = "input", value_name = "WAV")]
        input: PathBuf,

        /// Where to record the assistant's audio
        #[arg(short = 'o', long = "output", value_name = "WAV")]
        output: Option<PathBuf>,

        /// Transport override (peer or relay)
        #[arg(short = 't', long = "transport")]
        transport: Option<String>,

        /// Practice scenario id
        #[arg(short = 's', long = "scenario")]
        scenario: Option<String>,

        /// Cultural context for the coach
        #[arg(long = "culture")]
        culture: Option<String>,

        /// Assistant voice (defaults to the configured voice)
        #[arg(long = "voice")]
        voice: Option<String>,

        /// Text message to send once connected
        #[arg(long = "text")]
        text: Option<String>,

        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(short = 'd', long = "duration")]
        duration: Option<u64>,
    },

    /// List the available assistant voices
    Voices,

    /// List the built-in practice scenarios
    Scenarios,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Voices => {
            for voice in RealtimeVoice::all() {
                println!("{voice}");
            }
            Ok(())
        }
        Commands::Scenarios => {
            for scenario in PracticeScenario::all() {
                println!("{scenario}");
            }
            Ok(())
        }
        Commands::Run {
            input,
            output,
            transport,
            scenario,
            culture,
            voice,
            text,
            duration,
        } => {
            let mut config = if let Some(config_path) = cli.config {
                info!("Loading configuration from {}", config_path.display());
                ClientConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
            } else {
                ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
            };

            if let Some(transport) = transport {
                config.transport = TransportKind::parse(&transport)
                    .ok_or_else(|| anyhow!("Invalid transport '{}'", transport))?;
            }

            let transcript_callback: TranscriptCallback = Arc::new(|entry: TranscriptEntry| {
                Box::pin(async move {
                    println!("[{}] {}", entry.speaker, entry.text);
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            });
            let error_callback: SessionErrorCallback = Arc::new(|error: SessionError| {
                Box::pin(async move {
                    eprintln!("Session error: {error}");
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            });
            let state_callback: StateChangeCallback = Arc::new(|state: SessionState| {
                Box::pin(async move {
                    info!("Session state: {}", state);
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            });

            let voice = voice.unwrap_or_else(|| config.default_voice.clone());
            let mut session = SessionConfig::new(voice)
                .on_transcript_event(transcript_callback)
                .on_error(error_callback)
                .on_state_change(state_callback);
            if let Some(scenario) = scenario {
                session = session.with_scenario(scenario);
            }
            if let Some(culture) = culture {
                session = session.with_cultural_context(culture);
            }

            let audio_output: Arc<dyn AudioOutput> = match output {
                Some(path) => Arc::new(
                    WavFileOutput::create(&path)
                        .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?,
                ),
                None => Arc::new(NullAudioOutput),
            };
            let mut host =
                HostCapabilities::new(Arc::new(WavFileInput::new(input)), audio_output);
            if config.transport == TransportKind::Peer {
                host = host.with_peer_connector(Arc::new(WebRtcPeerConnector::from_config(
                    &config,
                )?));
            }

            run_session(session, config, host, text, duration).await
        }
    }
}

async fn run_session(
    session: SessionConfig,
    config: ClientConfig,
    host: HostCapabilities,
    text: Option<String>,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    let controller = SessionController::with_host(session, config, host)?;

    let state = controller.start().await;
    if state != SessionState::Connected {
        anyhow::bail!("Session did not connect (state: {state})");
    }

    if let Some(text) = text {
        controller.send_text(&text).await;
    }

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    let final_state = controller.state();
    let elapsed = controller.formatted_duration();
    let transcript = controller.stop().await.unwrap_or_else(|| controller.transcript());

    info!("Session ended after {} ({})", elapsed, final_state);
    println!("{}", serde_json::to_string_pretty(&transcript)?);

    Ok(())
}
