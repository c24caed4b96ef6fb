use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use pipenode::config::CONF_ENCRYPT;
use pipenode::constants::APP_VERSION;
use pipenode::events::model::LogLevel;
use pipenode::handlers::{CipherMode, EncryptHandler};
use pipenode::node::{Node, NodeEvent, NodeObserver};

#[derive(Parser, Debug)]
#[command(author, version = APP_VERSION, about = "pipenode processing node host")]
struct Args {
    /// Path to the node configuration file
    config: String,

    /// Override the JSON event log path
    #[arg(long)]
    log_json: Option<String>,

    /// Only print warnings and errors to the console
    #[arg(long)]
    quiet: bool,
}

/// Prints node events to the console and reports a network-initiated
/// shutdown back to the main loop.
struct ConsoleObserver {
    shutdown_tx: mpsc::Sender<()>,
}

impl NodeObserver for ConsoleObserver {
    fn node_event(&self, event: NodeEvent, message: &str) {
        match event {
            NodeEvent::Notification => println!("   {}", message),
            NodeEvent::QueueStatus => println!("   [queues] {}", message),
            NodeEvent::Warning => println!("⚠️  {}", message),
            NodeEvent::Error => eprintln!("❌ {}", message),
            NodeEvent::Shutdown => {
                println!("   {}", message);
                let _ = self.shutdown_tx.try_send(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let console_level = if args.quiet {
        Some(LogLevel::Warn)
    } else {
        None
    };
    pipenode::events::init_events_with_options(args.log_json.clone(), console_level).await;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let node = Node::new();
    node.set_observer(Arc::new(ConsoleObserver { shutdown_tx }));

    node.configure(&args.config)
        .with_context(|| format!("failed to configure node from '{}'", args.config))?;

    // The encrypt item decides whether this node ciphers outgoing data
    // or deciphers incoming data.
    match node.config_value(CONF_ENCRYPT).as_str() {
        "encrypt" => node.add_handler(Arc::new(EncryptHandler::new(CipherMode::Encrypt))),
        "decrypt" => node.add_handler(Arc::new(EncryptHandler::new(CipherMode::Decrypt))),
        _ => {}
    }

    node.start().await.context("failed to start node")?;

    println!("Enter command (ping, readfile, quit or shutdown) >");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                // Shutdown arrived from the network; the node has
                // already stopped itself.
                break;
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                node.handle_command(command);
                if command == "quit" || command == "shutdown" {
                    // Give the command loop a moment to forward the
                    // shutdown package before tearing down.
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                    break;
                }
            }
        }
    }

    node.stop();
    Ok(())
}
