//! Console runner for workflow graphs.
//!
//! Run with: cargo run -p run-console -- graph.json [--debug] [--breakpoint NODE]
//!
//! Streams the run console to stdout. In debug mode, type `r` (resume),
//! `p` (pause), `s` (step over) or `t` (terminate) followed by Enter.
//! Ctrl-C cancels the active run.

use std::{io::BufRead, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast::error::RecvError, mpsc, oneshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow_runtime_core::{GraphDocument, JsonGraph, LogStore, LogUpdate, SessionKind};
use workflow_runtime_session::{RuntimeConfig, RuntimeDriver, RuntimeHandle, RuntimeUpdate};
use workflow_runtime_transport::DebugCommand;

#[derive(Debug, Parser)]
#[command(name = "run-console", about = "Run a workflow graph against an execution backend")]
struct Args {
    /// Graph document (JSON).
    graph: PathBuf,

    /// Start a debug session instead of a normal run.
    #[arg(long)]
    debug: bool,

    /// Node to pause before; repeatable. Implies --debug.
    #[arg(long = "breakpoint", value_name = "NODE")]
    breakpoints: Vec<String>,

    /// Backend WebSocket URL.
    #[arg(long)]
    url: Option<String>,

    /// Connect timeout in seconds.
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = RuntimeConfig::from_env()?;
    if let Some(url) = args.url {
        config = config.with_backend_url(url);
    }
    if let Some(secs) = args.connect_timeout {
        config = config.with_connect_timeout_secs(secs);
    }
    config.validate()?;

    let graph = JsonGraph::from_file(&args.graph)
        .with_context(|| format!("loading graph {}", args.graph.display()))?;

    let (handle, driver) = RuntimeDriver::spawn_websocket(config);
    let mut updates = handle.subscribe();

    let (printer_done, done) = oneshot::channel();
    let printer = tokio::spawn(print_logs(handle.logs(), done));

    let debug = args.debug || !args.breakpoints.is_empty();
    for node_id in &args.breakpoints {
        handle.toggle_breakpoint(node_id.clone()).await?;
    }
    let kind = if debug {
        SessionKind::Debug
    } else {
        SessionKind::Normal
    };
    handle.start(kind, graph.to_json(), None).await?;

    let reader = debug.then(|| {
        let commands = read_commands();
        tokio::spawn(forward_commands(handle.clone(), commands))
    });

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(RuntimeUpdate::SessionChanged(view)) if !view.active => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.stop().await?;
                break;
            }
        }
    }

    // Final entries are appended before the session closes.
    let _ = printer_done.send(());
    let _ = printer.await;

    let counts = handle.node_states().await?.status_counts();
    println!(
        "nodes: {} succeeded, {} failed, {} paused, {} processing, {} idle",
        counts.succeeded, counts.failed, counts.paused, counts.processing, counts.idle
    );

    if let Some(reader) = reader {
        reader.abort();
    }
    drop(handle);
    let _ = driver.await;
    Ok(())
}

async fn print_logs(logs: Arc<LogStore>, mut done: oneshot::Receiver<()>) {
    let print = |update: LogUpdate| {
        if let LogUpdate::Appended(entry) = update {
            println!("{entry}");
        }
    };
    let mut stream = logs.history_plus_stream();
    loop {
        tokio::select! {
            biased;
            update = stream.next() => match update {
                Some(update) => print(update),
                None => return,
            },
            _ = &mut done => break,
        }
    }
    while let Some(Some(update)) = stream.next().now_or_never() {
        print(update);
    }
}

/// Read debug commands from stdin on a plain thread; a blocking tokio stdin
/// read would hold up runtime shutdown.
fn read_commands() -> mpsc::UnboundedReceiver<DebugCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "r" | "resume" => DebugCommand::Resume,
                "p" | "pause" => DebugCommand::Pause,
                "s" | "step" => DebugCommand::StepOver,
                "t" | "terminate" => DebugCommand::Terminate,
                "" => continue,
                other => {
                    eprintln!("unknown command: {other}");
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
    rx
}

async fn forward_commands(
    handle: RuntimeHandle,
    mut commands: mpsc::UnboundedReceiver<DebugCommand>,
) {
    while let Some(command) = commands.recv().await {
        match handle.send_command(command).await {
            Ok(outcome) => tracing::debug!(?outcome, command = command.as_str(), "command"),
            Err(_) => break,
        }
    }
}
