use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conrumbo_appcore::AppService;
use conrumbo_backend::parse::protocol_step_text;
use conrumbo_core::messages::{MSG_API_UNREACHABLE, MSG_READY, step_heading};
use conrumbo_core::types::ProtocolId;
use conrumbo_engine::events::ControllerEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "conrumbo")]
#[command(about = "Hands-free first-aid guidance from the terminal")]
struct Cli {
    /// Override the config file location
    #[arg(long = "config", env = "CONRUMBO_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Backend address for this run only
    #[arg(long = "api-base", env = "CONRUMBO_API_BASE", global = true)]
    api_base: Option<String>,

    /// Spoken language for this run only
    #[arg(long = "lang", env = "CONRUMBO_LANG", global = true)]
    language: Option<String>,

    /// Recognizer for this run only: auto, server or local
    #[arg(long = "stt", env = "CONRUMBO_STT", global = true)]
    recognizer: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether the backend is reachable
    Health,

    /// Send one situation description and print the matched guidance
    Understand {
        /// What is happening, in the caller's words
        text: String,
    },

    /// Fetch a stored protocol and print its steps
    Protocol {
        /// Protocol identifier, e.g. "rcp_adulto"
        id: String,
    },

    /// Resolve the emergency number and log the call attempt
    Call {
        /// Dial the rehearsal number instead of the real one
        #[arg(long)]
        test: bool,
    },

    /// Send session feedback to the backend
    Feedback {
        /// Free-form notes
        notes: String,
    },

    /// Show the stored configuration, or change the given fields
    Config {
        /// Backend address, e.g. "http://192.168.1.30:8000"
        #[arg(long)]
        backend: Option<String>,
        /// Spoken language as a BCP-47 tag
        #[arg(long)]
        language: Option<String>,
        /// Recognizer selection: auto, server or local
        #[arg(long)]
        recognizer: Option<String>,
        /// Listening window per utterance, in milliseconds
        #[arg(long)]
        capture_window_ms: Option<u64>,
    },
}

fn config_path(cli_override: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_override {
        return Ok(path);
    }
    let dir = dirs::data_local_dir().context("no local data directory for this user")?;
    Ok(dir.join("conrumbo").join("config.json"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut service = AppService::at_config_path(config_path(cli.config.clone())?);
    service.apply_overrides(
        cli.api_base.as_deref(),
        cli.language.as_deref(),
        cli.recognizer.as_deref(),
    )?;

    match cli.command {
        Some(Command::Health) => {
            if service.health_check().await {
                println!("{MSG_READY}");
            } else {
                println!("{MSG_API_UNREACHABLE}");
                std::process::exit(1);
            }
        }
        Some(Command::Understand { text }) => cmd_understand(&service, &text).await?,
        Some(Command::Protocol { id }) => cmd_protocol(&service, &id).await?,
        Some(Command::Call { test }) => print_call(&service, test).await,
        Some(Command::Feedback { notes }) => {
            service.send_feedback(&notes).await?;
            println!("Feedback enviado. Gracias.");
        }
        Some(Command::Config {
            backend,
            language,
            recognizer,
            capture_window_ms,
        }) => cmd_config(&mut service, backend, language, recognizer, capture_window_ms).await?,
        None => run_assistant(service).await?,
    }

    Ok(())
}

async fn cmd_understand(service: &AppService, text: &str) -> anyhow::Result<()> {
    let reply = service.understand(text).await?;
    println!("intent: {} (confianza {:.2})", reply.intent, reply.confidence);

    let next = service
        .next_step(reply.context.as_ref(), Some(&reply.intent))
        .await?;
    println!();
    println!("{}", step_heading(None, next.title.as_deref()));
    println!("{}", next.step_text);
    if next.done {
        println!("(protocolo completo)");
    }
    Ok(())
}

async fn cmd_protocol(service: &AppService, id: &str) -> anyhow::Result<()> {
    let doc = service.protocol(&ProtocolId::new(id)).await?;
    println!("{}", doc.title);
    for (i, step) in doc.steps.iter().enumerate() {
        let text = protocol_step_text(step);
        if !text.is_empty() {
            println!("{}. {}", i + 1, text);
        }
    }
    Ok(())
}

async fn print_call(service: &AppService, test: bool) {
    let outcome = service.place_call(test).await;
    println!("Llama ahora: {}", outcome.dial_uri);
    if !outcome.logged {
        println!("(la llamada no quedo registrada en el servidor)");
    }
}

async fn cmd_config(
    service: &mut AppService,
    backend: Option<String>,
    language: Option<String>,
    recognizer: Option<String>,
    capture_window_ms: Option<u64>,
) -> anyhow::Result<()> {
    let unchanged = backend.is_none()
        && language.is_none()
        && recognizer.is_none()
        && capture_window_ms.is_none();
    if unchanged {
        println!("{}", serde_json::to_string_pretty(service.config())?);
        return Ok(());
    }

    let mut cfg = service.config().clone();
    if let Some(backend) = backend {
        cfg.api_base = backend;
    }
    if let Some(language) = language {
        cfg.language = language;
    }
    if let Some(recognizer) = recognizer {
        cfg.recognizer = recognizer;
    }
    if let Some(ms) = capture_window_ms {
        cfg.capture_window_ms = ms;
    }

    let saved = service.save_config(cfg).await?;
    println!("{}", serde_json::to_string_pretty(&saved)?);
    Ok(())
}

/// Interactive hands-free session. The controller talks through the
/// speakers; this loop mirrors everything as text and takes typed input
/// for environments where speaking is not an option.
async fn run_assistant(service: AppService) -> anyhow::Result<()> {
    if service.health_check().await {
        println!("{MSG_READY}");
    } else {
        println!("{MSG_API_UNREACHABLE}");
    }

    let (controller, mut events) = service.build_controller()?;

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!(
        "Enter para escuchar o parar, texto para responder por escrito, \
         'call' para llamar al {}, 'q' para salir.",
        service.config().emergency_number
    );

    controller.start().await;

    loop {
        tokio::select! {
            Some(event) = events.recv() => render(&event),
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match line.trim() {
                    "" => {
                        if controller.state().await.is_active() {
                            controller.stop().await;
                        } else {
                            controller.start().await;
                        }
                    }
                    "q" | "quit" | "salir" => break,
                    "call" | "llamar" => print_call(&service, false).await,
                    "call test" => print_call(&service, true).await,
                    text => controller.submit_utterance(text).await,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.stop().await;
    while let Ok(event) = events.try_recv() {
        render(&event);
    }
    Ok(())
}

fn render(event: &ControllerEvent) {
    match event {
        ControllerEvent::Status(msg) => println!("{msg}"),
        ControllerEvent::FinalTranscript(text) => println!("> {text}"),
        ControllerEvent::StepReady(step) => {
            println!();
            println!("== {} ==", step_heading(step.number, step.title.as_deref()));
            println!("{}", step.text);
            println!();
        }
        ControllerEvent::CallHighlight(_) => {
            println!("*** Escribe 'call' para llamar ahora. ***");
        }
        ControllerEvent::StateChanged { from, to } => {
            log::debug!("state {from:?} -> {to:?}");
        }
        ControllerEvent::LoopEnded => log::debug!("guidance loop ended"),
    }
}
