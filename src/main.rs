//! Wingman: voice-driven software engineering assistant.
//!
//! Entry point wiring the CLI modes onto the orchestrator: continuous
//! listening (live or WAV replay), and non-interactive one-shot execution.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wingman::brain::CliReasoner;
use wingman::exec::OutputStream;
use wingman::transcribe::CommandSpeechToText;
use wingman::{Orchestrator, PipelineCommand, PipelineEvent, WingmanConfig};

#[derive(Parser)]
#[command(name = "wingman", version, about = "Voice-driven software engineering assistant")]
struct Cli {
    /// Config file (default: ~/.config/wingman/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen continuously and act on spoken commands (default)
    Listen {
        /// Raise reasoning to the highest-capability tier
        #[arg(long)]
        enhanced: bool,

        /// Replay a 16 kHz mono WAV file instead of live capture
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Run a single command non-interactively and exit
    Exec {
        /// The command text, as it would have been spoken
        command: String,
    },
    /// List available audio input devices
    #[cfg(feature = "audio-io")]
    Devices,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wingman=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = WingmanConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        None => listen(config, false, None),
        Some(Commands::Listen { enhanced, wav }) => listen(config, enhanced, wav),
        Some(Commands::Exec { command }) => exec_once(config, command),
        #[cfg(feature = "audio-io")]
        Some(Commands::Devices) => {
            for device in wingman::audio::list_input_devices()? {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{}", device.name, marker);
            }
            Ok(())
        }
    }
}

/// Continuous pipeline: capture (or replay) → segment → transcribe →
/// reason → execute/speak, until ctrl-c.
fn listen(mut config: WingmanConfig, enhanced: bool, wav: Option<PathBuf>) -> anyhow::Result<()> {
    config.reasoner.enhanced = enhanced;
    tracing::info!(enhanced, "starting wingman");

    let engine = CommandSpeechToText::new(&config.transcriber)?;
    let reasoner = CliReasoner::new(config.reasoner.clone())?;
    let (orchestrator, handle) = Orchestrator::new(config, engine, reasoner, true)?;
    let worker_handles = orchestrator.start()?;

    // Ctrl-c translates into a clean terminal transition.
    let shutdown_tx = handle.command_sender();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("signal runtime");
        runtime.block_on(async {
            let _ = tokio::signal::ctrl_c().await;
        });
        let _ = shutdown_tx.send(PipelineCommand::Shutdown);
    });

    let replay_done = Arc::new(AtomicBool::new(false));
    let source_stop = Arc::new(AtomicBool::new(false));

    #[cfg(feature = "audio-io")]
    let mut capture = None;

    match &wav {
        Some(path) => {
            let source = wingman::audio::WavSource::open(path)?;
            let queue = handle.frame_queue();
            let done = Arc::clone(&replay_done);
            let stop = Arc::clone(&source_stop);
            std::thread::spawn(move || {
                source.start(queue, stop).join().ok();
                done.store(true, Ordering::SeqCst);
            });
        }
        None => {
            #[cfg(feature = "audio-io")]
            {
                let mut source = wingman::audio::CaptureSource::new()?;
                source.start(handle.frame_queue())?;
                capture = Some(source);
            }
            #[cfg(not(feature = "audio-io"))]
            bail!("built without audio-io; use --wav or the exec subcommand");
        }
    }

    // After a replay completes, leave once the pipeline settles.
    if wav.is_some() {
        let settle_tx = handle.command_sender();
        let done = Arc::clone(&replay_done);
        let probe = handle.subscribe_status();
        std::thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
            // Drain pending work: wait until no transition has fired for a
            // couple of seconds.
            loop {
                match probe.recv_timeout(Duration::from_secs(2)) {
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            let _ = settle_tx.send(PipelineCommand::Shutdown);
        });
    }

    loop {
        let event = match handle.recv_event() {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            PipelineEvent::Transcript(text) => println!("» {}", text),
            PipelineEvent::DecisionMade(decision) => {
                if let Some(speak) = &decision.speak {
                    println!("  {}", speak);
                }
                if let Some(action) = &decision.action {
                    println!("  $ {}", action);
                }
            }
            PipelineEvent::ActionOutput(chunk) => println!("  | {}", chunk.line),
            PipelineEvent::ActionFinished { outcome, .. } => {
                println!("  = {}", outcome);
            }
            PipelineEvent::Error(error) => eprintln!("wingman: {}", error),
            PipelineEvent::StateChanged(state) => {
                tracing::debug!(%state, "pipeline state");
            }
            PipelineEvent::Shutdown => break,
        }
    }

    source_stop.store(true, Ordering::SeqCst);
    #[cfg(feature = "audio-io")]
    if let Some(mut source) = capture.take() {
        source.stop();
    }

    for handle in worker_handles {
        let _ = handle.join();
    }
    tracing::info!("wingman stopped");
    Ok(())
}

/// One-shot mode: the segmenter and transcription stages stay disengaged;
/// the supplied text goes straight through routing, reasoning, and
/// execution, with output streamed to the terminal.
fn exec_once(mut config: WingmanConfig, command: String) -> anyhow::Result<()> {
    config.speech.enabled = false;

    let engine = CommandSpeechToText::new(&config.transcriber)?;
    let reasoner = CliReasoner::new(config.reasoner.clone())?;
    let (orchestrator, handle) = Orchestrator::new(config, engine, reasoner, false)?;
    let worker_handles = orchestrator.start()?;

    handle.submit_text(command)?;

    let mut exit_failure = false;
    let mut awaiting_action = false;

    loop {
        let event = match handle.recv_event_timeout(Duration::from_secs(300)) {
            Some(event) => event,
            None => {
                handle.shutdown()?;
                bail!("pipeline produced no result in time");
            }
        };

        match event {
            PipelineEvent::DecisionMade(decision) => {
                if let Some(speak) = &decision.speak {
                    println!("{}", speak);
                }
                if decision.action.is_some() {
                    awaiting_action = true;
                } else {
                    handle.shutdown()?;
                }
            }
            PipelineEvent::ActionOutput(chunk) => match chunk.stream {
                OutputStream::Stdout => println!("{}", chunk.line),
                OutputStream::Stderr => eprintln!("{}", chunk.line),
            },
            PipelineEvent::ActionFinished { outcome, .. } => {
                if awaiting_action {
                    exit_failure = !outcome.is_success();
                    if !outcome.is_success() {
                        eprintln!("wingman: action ended with {}", outcome);
                    }
                    handle.shutdown()?;
                }
            }
            PipelineEvent::Error(error) => eprintln!("wingman: {}", error),
            PipelineEvent::Shutdown => break,
            _ => {}
        }
    }

    for handle in worker_handles {
        let _ = handle.join();
    }

    if exit_failure {
        std::process::exit(1);
    }
    Ok(())
}
