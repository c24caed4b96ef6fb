// src/node.rs

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;

use crate::config::{
    ConfigurationFileReader, NodeConfig, CONF_CONFIG_IN, CONF_FILE_IN, CONF_FILE_OUT, CONF_INPUT,
    CONF_NODE_NAME, CONF_OUTPUT, CONF_USE_ACK, value_is_unset,
};
use crate::constants::{CONFIG_REPLY_NEXT_HOP, SHUTDOWN_FLUSH_PAUSE_MS};
use crate::error::NodeError;
use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, SystemEvent},
};
use crate::handlers::{ConfigurationHandler, Handler, HandlerChain, PingHandler};
use crate::network::reader::{DataReader, ReaderObserver};
use crate::network::writer::Writer;
use crate::package::{Package, PackageType};

/// What kind of event the node reports to its observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Plain progress message for the user.
    Notification,
    /// Queue depth report, formatted as `name:current:max` entries.
    QueueStatus,
    Warning,
    Error,
    /// The node has stopped after a shutdown it initiated itself
    /// (local quit command or a shutdown package from the network).
    Shutdown,
}

/// The surface a node uses to talk to its embedding application. All
/// callbacks arrive from the node's worker tasks; implementations must
/// not block and must not assume a particular thread.
pub trait NodeObserver: Send + Sync {
    fn node_event(&self, event: NodeEvent, message: &str);
}

fn emit_system(component: &'static str, level: LogLevel, action: &str, detail: Option<String>) {
    let mut meta = dispatcher::meta(component, level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::System(SystemEvent {
        meta,
        action: action.into(),
        detail,
    }));
}

/// Signals and observer surface shared between the node's worker loops
/// and its readers.
struct Shared {
    running: AtomicBool,
    stopped: AtomicBool,
    node_initiated_shutdown: AtomicBool,
    /// Level-triggered "something arrived" flag, cleared by the
    /// dispatch loop after draining the readers.
    has_incoming: AtomicBool,
    incoming: Notify,
    command: Mutex<String>,
    command_wake: Notify,
    observer: RwLock<Option<Arc<dyn NodeObserver>>>,
    /// Per-queue (current, high water) package counts.
    queue_counts: Mutex<BTreeMap<String, (usize, usize)>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            node_initiated_shutdown: AtomicBool::new(false),
            has_incoming: AtomicBool::new(false),
            incoming: Notify::new(),
            command: Mutex::new(String::new()),
            command_wake: Notify::new(),
            observer: RwLock::new(None),
            queue_counts: Mutex::new(BTreeMap::new()),
        }
    }

    fn notify_observer(&self, event: NodeEvent, message: &str) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.node_event(event, message);
        }
    }
}

impl ReaderObserver for Shared {
    fn received_data(&self) {
        self.has_incoming.store(true, Ordering::SeqCst);
        self.incoming.notify_one();
    }

    fn error_in_data(&self, what: &str) {
        let message = format!("ERROR in incoming data; discarded: {}", what);
        emit_system("node", LogLevel::Warn, "bad_data_discarded", Some(what.to_string()));
        self.notify_observer(NodeEvent::Error, &message);
    }
}

struct NodeInner {
    shared: Arc<Shared>,
    config: RwLock<Option<NodeConfig>>,
    data_reader: RwLock<Option<Arc<DataReader>>>,
    config_reader: RwLock<Option<Arc<DataReader>>>,
    writer: RwLock<Option<Arc<Writer>>>,
    /// Sends configuration replies when the node has no next hop. The
    /// reply destination always comes from the request's origin, so
    /// this writer points at a placeholder address.
    config_writer: RwLock<Option<Arc<Writer>>>,
    chain: HandlerChain,
    data_file: RwLock<String>,
    output_file: RwLock<String>,
    node_name: RwLock<String>,
    use_acks: AtomicBool,
}

/// A single processing node (Filter) in a pipeline of nodes.
///
/// A node reads packages from its input port, passes them through an
/// ordered chain of handlers and writes the results to the next node.
/// It also answers in-band control commands (`ping`, `readfile`,
/// `shutdown`) and remote configuration messages.
///
/// `Node` is a cheap cloneable handle over shared state; the worker
/// loops and the handlers all operate on the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// A new unconfigured node. The builtin ping and configuration
    /// handlers are installed ahead of any user handlers.
    pub fn new() -> Self {
        let node = Self {
            inner: Arc::new(NodeInner {
                shared: Arc::new(Shared::new()),
                config: RwLock::new(None),
                data_reader: RwLock::new(None),
                config_reader: RwLock::new(None),
                writer: RwLock::new(None),
                config_writer: RwLock::new(None),
                chain: HandlerChain::new(),
                data_file: RwLock::new(String::new()),
                output_file: RwLock::new(String::new()),
                node_name: RwLock::new(String::new()),
                use_acks: AtomicBool::new(false),
            }),
        };
        node.inner.chain.push(Arc::new(PingHandler));
        node.inner.chain.push(Arc::new(ConfigurationHandler));
        node
    }

    pub fn set_observer(&self, observer: Arc<dyn NodeObserver>) {
        *self.inner.shared.observer.write() = Some(observer);
    }

    /// Append a handler after the builtin ones.
    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.inner.chain.push(handler);
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.running.load(Ordering::SeqCst)
    }

    // MARK: Configuration

    /// Configure the node from a configuration file. A corrupt file is
    /// fatal: the error is surfaced to the observer and the node does
    /// not start.
    pub fn configure(&self, config_file: impl AsRef<Path>) -> Result<(), NodeError> {
        let path = config_file.as_ref();
        self.show_ui_message("------ > Configuring node...");

        let mut config = NodeConfig::new();
        if let Err(e) = ConfigurationFileReader::read(path, &mut config) {
            let message = format!("ERROR Could not configure the node with {}: {}", path.display(), e);
            emit_system("node", LogLevel::Error, "configure_failed", Some(e.to_string()));
            self.inner.shared.notify_observer(NodeEvent::Error, &message);
            return Err(e);
        }

        self.set_input_source(&config.value(CONF_INPUT))?;
        self.set_configuration_input_source(&config.value(CONF_CONFIG_IN))?;
        self.set_output_sink(&config.value(CONF_OUTPUT));
        self.set_data_file_name(&config.value(CONF_FILE_IN));
        self.set_output_file_name(&config.value(CONF_FILE_OUT));
        *self.inner.node_name.write() = config.value(CONF_NODE_NAME);

        let use_acks = matches!(config.value(CONF_USE_ACK).as_str(), "true" | "1");
        self.inner.use_acks.store(use_acks, Ordering::SeqCst);

        *self.inner.config.write() = Some(config);

        // Without a next hop, configuration replies need their own way
        // out; with one, the regular writer carries them.
        self.create_configuration_output_writer();

        emit_system(
            "node",
            LogLevel::Info,
            "node_configured",
            Some(format!("file={} use_acks={}", path.display(), use_acks)),
        );
        self.show_ui_message("------ > Configured");
        Ok(())
    }

    fn set_input_source(&self, port: &str) -> Result<(), NodeError> {
        if value_is_unset(port) {
            self.show_ui_message("This node has no previous node to read data from.");
            return Ok(());
        }
        let port: u16 = port
            .parse()
            .map_err(|_| NodeError::BadAddress(port.to_string()))?;
        self.log_and_show_ui_message(
            &format!("Reading data from port {}", port),
            NodeEvent::Notification,
        );
        let observer: Arc<dyn ReaderObserver> = self.inner.shared.clone();
        *self.inner.data_reader.write() = Some(Arc::new(DataReader::new(port, observer, false)));
        Ok(())
    }

    fn set_configuration_input_source(&self, port: &str) -> Result<(), NodeError> {
        if value_is_unset(port) {
            self.show_ui_message("This node has no configuration port to read config messages from.");
            return Ok(());
        }
        let port: u16 = port
            .parse()
            .map_err(|_| NodeError::BadAddress(port.to_string()))?;
        self.log_and_show_ui_message(
            &format!("Reading configurations from port {}", port),
            NodeEvent::Notification,
        );
        // Several nodes may run on the same machine, all listening to
        // the same configuration broadcast port, so this reader binds
        // with address reuse enabled.
        let observer: Arc<dyn ReaderObserver> = self.inner.shared.clone();
        *self.inner.config_reader.write() = Some(Arc::new(DataReader::new(port, observer, true)));
        Ok(())
    }

    fn set_output_sink(&self, next_hop: &str) {
        if value_is_unset(next_hop) {
            self.show_ui_message("This node has no next node to send data to.");
            return;
        }
        self.show_ui_message(&format!("Sending data to {}", next_hop));
        *self.inner.writer.write() = Some(Arc::new(Writer::new(next_hop)));
    }

    fn create_configuration_output_writer(&self) {
        let has_writer = self.inner.writer.read().is_some();
        let has_config_reader = self.inner.config_reader.read().is_some();
        if !has_writer && has_config_reader {
            emit_system(
                "node",
                LogLevel::Info,
                "config_writer_created",
                Some(format!("placeholder={}", CONFIG_REPLY_NEXT_HOP)),
            );
            *self.inner.config_writer.write() = Some(Arc::new(Writer::new(CONFIG_REPLY_NEXT_HOP)));
        }
    }

    fn set_data_file_name(&self, file_name: &str) {
        let file_name = if value_is_unset(file_name) { "" } else { file_name };
        *self.inner.data_file.write() = file_name.to_string();
        let message = if file_name.is_empty() {
            "Node has no local data input file.".to_string()
        } else {
            format!("Node uses local input data file: {}", file_name)
        };
        self.log_and_show_ui_message(&message, NodeEvent::Notification);
    }

    fn set_output_file_name(&self, file_name: &str) {
        let file_name = if value_is_unset(file_name) { "" } else { file_name };
        *self.inner.output_file.write() = file_name.to_string();
        let message = if file_name.is_empty() {
            "Node has no local data output file.".to_string()
        } else {
            format!("Node uses local output data file: {}", file_name)
        };
        self.log_and_show_ui_message(&message, NodeEvent::Notification);
    }

    /// The node's configuration, if `configure` has run.
    pub fn configuration(&self) -> Option<NodeConfig> {
        self.inner.config.read().clone()
    }

    /// Value of one configuration item; empty when absent or when the
    /// node has not been configured.
    pub fn config_value(&self, name: &str) -> String {
        self.inner
            .config
            .read()
            .as_ref()
            .map(|config| config.value(name))
            .unwrap_or_default()
    }

    /// Merge configuration items from the JSON form into the node's
    /// configuration, add-or-replace by name. The merge is in-memory
    /// only; the configuration file is not rewritten.
    pub fn merge_config_items(&self, payload: &Value) {
        let name = {
            let mut guard = self.inner.config.write();
            let Some(config) = guard.as_mut() else {
                return;
            };
            config.merge_json(payload);
            config.value(CONF_NODE_NAME)
        };
        *self.inner.node_name.write() = name;
    }

    pub fn name(&self) -> String {
        self.inner.node_name.read().clone()
    }

    /// Name of the local input data file, empty if none. Used by
    /// handlers that read bulk input when the `readfile` command runs.
    pub fn data_file_name(&self) -> String {
        self.inner.data_file.read().clone()
    }

    /// Name of the local output data file, empty if none.
    pub fn output_file_name(&self) -> String {
        self.inner.output_file.read().clone()
    }

    // MARK: Running

    /// Start the node: bind and start each configured reader and
    /// writer, then spawn the dispatch and command loops.
    pub async fn start(&self) -> Result<(), NodeError> {
        if self.inner.config.read().is_none() {
            return Err(NodeError::NotConfigured);
        }
        if self.inner.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shared.stopped.store(false, Ordering::SeqCst);
        self.inner
            .shared
            .node_initiated_shutdown
            .store(false, Ordering::SeqCst);

        self.show_ui_message(&format!("------ > Starting the node {}", self.name()));
        let use_acks = self.inner.use_acks.load(Ordering::SeqCst);

        let data_reader = self.inner.data_reader.read().clone();
        let config_reader = self.inner.config_reader.read().clone();
        let writer = self.inner.writer.read().clone();
        let config_writer = self.inner.config_writer.read().clone();

        let started: Result<(), NodeError> = async {
            if let Some(reader) = &data_reader {
                reader.start(use_acks).await?;
            }
            if let Some(reader) = &config_reader {
                reader.start(use_acks).await?;
            }
            if let Some(writer) = &writer {
                writer.start(use_acks).await?;
            }
            if let Some(writer) = &config_writer {
                writer.start(use_acks).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = started {
            let message = format!("ERROR Could not start the node's networking components: {}", e);
            emit_system("node", LogLevel::Error, "start_failed", Some(e.to_string()));
            self.inner.shared.notify_observer(NodeEvent::Error, &message);
            self.stop();
            return Err(e);
        }

        let dispatcher_node = self.clone();
        tokio::spawn(async move { dispatcher_node.dispatch_loop().await });
        let command_node = self.clone();
        tokio::spawn(async move { command_node.command_loop().await });

        emit_system("node", LogLevel::Info, "node_started", Some(self.name()));
        Ok(())
    }

    /// Waits for the incoming signal and drains the readers through the
    /// handler chain; the configuration reader first, then the data
    /// reader.
    async fn dispatch_loop(self) {
        loop {
            self.inner.shared.incoming.notified().await;
            if !self.is_running() {
                break;
            }
            let config_reader = self.inner.config_reader.read().clone();
            if let Some(reader) = config_reader {
                self.handle_packages_from(&reader).await;
            }
            let data_reader = self.inner.data_reader.read().clone();
            if let Some(reader) = data_reader {
                self.handle_packages_from(&reader).await;
                self.update_queue_count("net-in", reader.queue_size());
            }
            self.inner.shared.has_incoming.store(false, Ordering::SeqCst);
        }
        emit_system("node", LogLevel::Debug, "dispatch_loop_exit", None);
    }

    /// Drain one reader. A shutdown control package is forwarded
    /// downstream, the writer gets a moment to flush, and the node
    /// turns the shutdown into a local quit; packages queued behind the
    /// shutdown are discarded.
    async fn handle_packages_from(&self, reader: &DataReader) {
        loop {
            if !self.is_running() {
                break;
            }
            let mut package = reader.read();
            if package.is_empty() {
                break;
            }
            emit_system(
                "node",
                LogLevel::Debug,
                "package_dispatch",
                Some(format!(
                    "id={} type={}",
                    package.id(),
                    package.package_type().as_str()
                )),
            );
            self.show_ui_message("Received a package.");

            if package.package_type() == PackageType::Control
                && package.payload_str() == "shutdown"
            {
                self.show_ui_message("Got shutdown command, forwarding and initiating shutdown.");
                self.send_data(&package);
                tokio::time::sleep(Duration::from_millis(SHUTDOWN_FLUSH_PAUSE_MS)).await;
                *self.inner.shared.command.lock() = "quit".to_string();
                self.inner.shared.command_wake.notify_one();
                break;
            }

            // Acknowledgements bypass the chain: a synthesized ack
            // travels back to the data package's origin, a received
            // ack settles the writer's sent set.
            if package.package_type() == PackageType::Ack {
                self.send_data(&package);
                continue;
            }

            if package.package_type() == PackageType::Control {
                self.clear_queue_counts();
                self.show_ui_message(&format!(
                    "Control package arrived with command {}",
                    package.payload_str()
                ));
            }
            self.pass_to_handlers(&mut package);
        }
    }

    /// Waits for commands from the embedding application or from the
    /// dispatch loop and interprets them.
    async fn command_loop(self) {
        loop {
            self.inner.shared.command_wake.notified().await;
            if !self.is_running() {
                break;
            }
            let command = std::mem::take(&mut *self.inner.shared.command.lock());
            if command.is_empty() {
                continue;
            }
            emit_system(
                "node",
                LogLevel::Info,
                "command_received",
                Some(command.clone()),
            );
            match command.as_str() {
                "ping" => {
                    let package = Package::with_payload(PackageType::Control, "ping");
                    self.send_data(&package);
                    self.show_ui_message("Ping sent to next node (if any).");
                }
                "readfile" => {
                    self.clear_queue_counts();
                    let data_file = self.data_file_name();
                    if data_file.is_empty() {
                        self.show_ui_message(
                            "Readfile command came, but no data file specified for this node.",
                        );
                    } else {
                        self.show_ui_message(&format!("Handling command to read a file {}", data_file));
                        let mut package = Package::with_payload(PackageType::Control, "readfile");
                        self.pass_to_handlers(&mut package);
                    }
                }
                "quit" | "shutdown" => {
                    if command == "shutdown" {
                        let package = Package::with_payload(PackageType::Control, "shutdown");
                        self.send_data(&package);
                        self.log_and_show_ui_message(
                            "Sent the shutdown command to next node (if any).",
                            NodeEvent::Notification,
                        );
                    }
                    self.log_and_show_ui_message(
                        "Initiated quitting of this node...",
                        NodeEvent::Notification,
                    );
                    self.inner.shared.running.store(false, Ordering::SeqCst);
                    self.inner
                        .shared
                        .node_initiated_shutdown
                        .store(true, Ordering::SeqCst);
                    self.inner.shared.incoming.notify_one();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    break;
                }
                other => {
                    emit_system(
                        "node",
                        LogLevel::Debug,
                        "command_ignored",
                        Some(other.to_string()),
                    );
                }
            }
        }
        if self
            .inner
            .shared
            .node_initiated_shutdown
            .load(Ordering::SeqCst)
        {
            self.stop();
        }
        emit_system("node", LogLevel::Debug, "command_loop_exit", None);
    }

    /// Hand a command from the embedding application to the command
    /// loop. The known commands are `ping`, `readfile`, `quit` and
    /// `shutdown`; anything else is ignored.
    pub fn handle_command(&self, command: &str) {
        *self.inner.shared.command.lock() = command.to_string();
        self.inner.shared.command_wake.notify_one();
        // The writer never calls back after a send, so refresh the
        // outbound queue numbers on this path too.
        let writer = self.inner.writer.read().clone();
        if let Some(writer) = writer {
            self.update_queue_count("net-out", writer.queue_size());
        }
    }

    /// Send a package to the next node. Without a writer, configuration
    /// packages fall back to the configuration reply writer; everything
    /// else is dropped.
    pub fn send_data(&self, package: &Package) {
        let writer = self.inner.writer.read().clone();
        if let Some(writer) = writer {
            self.show_ui_message(&format!(
                "Sending a package of type {}",
                package.package_type().as_str()
            ));
            writer.write(package.clone());
            self.update_queue_count("net-out", writer.queue_size());
            return;
        }
        if package.package_type() == PackageType::Configuration {
            let config_writer = self.inner.config_writer.read().clone();
            if let Some(writer) = config_writer {
                self.show_ui_message("Sending configuration response message to the configurator.");
                writer.write(package.clone());
                return;
            }
        }
        emit_system(
            "node",
            LogLevel::Debug,
            "package_dropped_no_writer",
            Some(format!("id={}", package.id())),
        );
    }

    /// Offer a package to the handler chain, first handler first, until
    /// one consumes it.
    pub fn pass_to_handlers(&self, package: &mut Package) {
        self.inner.chain.dispatch(package, self);
    }

    /// Offer a package to the handlers after `current` only. For
    /// handlers that generate packages mid-chain (file readers) and
    /// want them processed downstream without re-entering the handlers
    /// before them.
    pub fn pass_to_next_handlers(&self, current: &dyn Handler, package: &mut Package) {
        self.inner.chain.dispatch_after(current, package, self);
    }

    // MARK: Stopping

    /// Stop the node: flip the running flag, wake every waiter and stop
    /// the readers and writers. The worker tasks are detached and exit
    /// on their own, so this never blocks; it is idempotent and safe to
    /// call from an observer callback.
    pub fn stop(&self) {
        if self.inner.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.show_ui_message("Stopping the node...");
        self.inner.shared.running.store(false, Ordering::SeqCst);
        self.inner.shared.incoming.notify_one();
        self.inner.shared.command_wake.notify_one();

        let data_reader = self.inner.data_reader.read().clone();
        if let Some(reader) = data_reader {
            reader.stop();
        }
        let config_reader = self.inner.config_reader.read().clone();
        if let Some(reader) = config_reader {
            reader.stop();
        }
        let config_writer = self.inner.config_writer.read().clone();
        if let Some(writer) = config_writer {
            writer.stop();
        }
        let writer = self.inner.writer.read().clone();
        if let Some(writer) = writer {
            writer.stop();
        }

        emit_system("node", LogLevel::Info, "node_stopped", Some(self.name()));
        self.show_ui_message("...Node stopped.");
        if self
            .inner
            .shared
            .node_initiated_shutdown
            .load(Ordering::SeqCst)
        {
            self.inner.shared.notify_observer(
                NodeEvent::Shutdown,
                "Shutdown of node requested from network.",
            );
        }
    }

    // MARK: Observer surface

    /// Notify the node observer (usually a UI) of something.
    pub fn show_ui_message(&self, message: &str) {
        self.inner
            .shared
            .notify_observer(NodeEvent::Notification, message);
    }

    /// Notify the node observer and write the message to the log too.
    pub fn log_and_show_ui_message(&self, message: &str, event: NodeEvent) {
        let level = match event {
            NodeEvent::Warning | NodeEvent::Error => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        emit_system("node", level, "ui_message", Some(message.to_string()));
        self.inner.shared.notify_observer(event, message);
    }

    fn clear_queue_counts(&self) {
        self.inner.shared.queue_counts.lock().clear();
    }

    /// Track the package count of a named queue and report all queue
    /// depths to the observer as `name:current:max` entries.
    fn update_queue_count(&self, queue_name: &str, package_count: usize) {
        let status = {
            let mut counts = self.inner.shared.queue_counts.lock();
            counts
                .entry(queue_name.to_string())
                .and_modify(|(current, max)| {
                    *current = package_count;
                    *max = (*max).max(package_count);
                })
                .or_insert((package_count, package_count));
            counts
                .iter()
                .map(|(name, (current, max))| format!("{}:{}:{}", name, current, max))
                .collect::<Vec<_>>()
                .join(" ")
        };
        self.inner
            .shared
            .notify_observer(NodeEvent::QueueStatus, &status);
    }
}
