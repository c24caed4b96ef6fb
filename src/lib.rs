//! # pipenode
//!
//! Framework for building distributed data-processing pipelines as a
//! chain of **nodes** (Filters in a Pipes-and-Filters architecture).
//! Each node receives units of work — [`package::Package`]s, one JSON
//! datagram each — from its predecessor over UDP, passes them through
//! an ordered chain of [`handlers::Handler`]s and forwards them to its
//! successor. Nodes also answer in-band control commands (`ping`,
//! `readfile`, `shutdown`) and remote configuration messages.
//!
//! ## Design Principles
//! * Async-first: socket and worker loops are detached Tokio tasks.
//! * Per-hop best-effort delivery, with an optional
//!   acknowledge-and-resend protocol between neighbours (`use-ack`).
//! * Pluggable processing: domain logic lives in handlers the
//!   embedding application adds to the node.
//! * Event-driven instrumentation (JSON line log + console) as a
//!   process-wide side effect, never part of a component contract.
//!
//! ## Key Modules
//! * `package` – the unit of work and its JSON wire form.
//! * `config` – configuration items, the node configuration set and
//!   the configuration file reader.
//! * `handlers` – the handler contract, the chain and the builtins.
//! * `network` – the UDP reader and the acknowledging writer.
//! * `node` – the node runtime tying the pieces together.
//! * `events` – structured logging/events dispatcher.
//!
//! ## Putting a node together
//!
//! ```no_run
//! use pipenode::node::Node;
//!
//! # async fn run() -> Result<(), pipenode::error::NodeError> {
//! let node = Node::new();
//! node.configure("node.config")?;
//! // node.add_handler(Arc::new(MyDomainHandler::new()));
//! node.start().await?;
//! node.handle_command("ping");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod handlers;
pub mod network;
pub mod node;
pub mod package;
pub mod prelude; // curated stable-intent re-exports
