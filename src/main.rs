// ABOUTME: Entry point for the voxlink realtime conversation daemon.
// ABOUTME: Wires transport, capture, routing, and PTT into a line-driven control loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use voxlink::capture::{AudioCapture, CpalRecorder, NoopAssistantAudio};
use voxlink::config::Config;
use voxlink::embedding::EmbeddingClient;
use voxlink::lifecycle::ConnectionLifecycleService;
use voxlink::ptt::PttOrchestrator;
use voxlink::router::{EventRouter, LogFunctionCalls, LogReconciler, LogUsage};
use voxlink::session::{LogStatusSink, NoUsageLimit, SessionEvent, SharedSession};
use voxlink::transport::{HttpCredentialProvider, LogRemoteAudio, WsTransportFactory};

type DynError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    // Register signal handlers early so they work during startup
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");

    tokio::select! {
        result = run() => {
            if let Err(e) = result {
                tracing::error!("Fatal: {e}");
                std::process::exit(1);
            }
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down");
        }
    }
}

async fn run() -> Result<(), DynError> {
    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let session = SharedSession::new();
    let status = Arc::new(LogStatusSink);
    let recorder: Arc<dyn AudioCapture> = Arc::new(CpalRecorder::new(&config.audio));
    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(64);

    let router = Arc::new(EventRouter::new(
        Duration::from_millis(config.ptt.drain_timeout_ms),
        events_tx,
        Arc::new(NoopAssistantAudio),
        Arc::new(LogReconciler),
        Arc::new(LogFunctionCalls),
        Arc::new(LogUsage),
    ));
    let lifecycle = Arc::new(ConnectionLifecycleService::new(
        session.clone(),
        config.connection.clone(),
        config.conversation.clone(),
        Arc::new(HttpCredentialProvider::new(&config.connection.token_endpoint)),
        Arc::new(WsTransportFactory::new(&config.connection)),
        recorder.clone(),
        status.clone(),
        router.clone(),
        Arc::new(LogRemoteAudio),
    ));
    let ptt = PttOrchestrator::new(
        session.clone(),
        lifecycle.clone(),
        router,
        recorder,
        Arc::new(NoUsageLimit),
        status,
        Duration::from_millis(config.connection.data_channel_timeout_ms),
    );
    let embedding = EmbeddingClient::from_config(&config.embedding);

    let release_buffer = config.ptt.release_buffer(config.connection.device_class);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    println!("commands: connect | press | release | embed <word> | pending | state <name> | stats | quit");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                let (command, argument) = match line.split_once(' ') {
                    Some((command, argument)) => (command, argument.trim()),
                    None => (line, ""),
                };
                match command {
                    "" => {}
                    "connect" => match lifecycle.connect().await {
                        Ok(()) => println!("connected"),
                        Err(e) => println!("connect failed: {e}"),
                    },
                    "press" => {
                        let outcome = ptt.handle_press().await;
                        if outcome.allowed {
                            println!("listening (hold)");
                        } else {
                            println!("press refused: {}", outcome.reason.unwrap_or_default());
                        }
                    }
                    "release" => {
                        ptt.handle_release(release_buffer);
                        println!("released");
                    }
                    "embed" if !argument.is_empty() => match embedding.lookup(argument).await {
                        Some(point) => {
                            println!("{argument}: ({}, {}, {})", point.x, point.y, point.z)
                        }
                        None => println!("{argument}: no embedding, using fallback"),
                    },
                    "pending" => match ptt.take_pending_recording() {
                        Some(recording) => println!(
                            "pending recording: {} ({} ms)",
                            recording.wav_path.display(),
                            recording.duration_ms
                        ),
                        None => println!("no pending recording"),
                    },
                    // Diagnostic override; unknown names are rejected with a warning
                    "state" if !argument.is_empty() => {
                        let snapshot = session
                            .connection()
                            .transition_named(argument, "operator_command");
                        println!("state: {}", snapshot.state);
                    }
                    "stats" => println!("{:#?}", embedding.health_stats()),
                    "quit" | "exit" => break,
                    other => println!("unknown command: {other}"),
                }
            }
            Some(event) = events_rx.recv() => {
                match event {
                    SessionEvent::UtteranceAdded(record) => {
                        let marker = if record.interrupted { " (interrupted)" } else { "" };
                        println!("assistant{marker}: {}", record.transcript);
                    }
                }
            }
        }
    }

    session.reset();
    Ok(())
}
