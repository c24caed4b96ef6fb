// src/handlers/configuration.rs

use serde_json::Value;

use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, SystemEvent},
};
use crate::handlers::Handler;
use crate::node::Node;
use crate::package::{Package, PackageType};

const OPERATION_READ: &str = "read";
const OPERATION_SET: &str = "set";
const OPERATION_INFO: &str = "info";

/// Handles remote configuration messages.
///
/// A `read` request is answered with an `info` package carrying the
/// node's current configuration, addressed back to the sender. A `set`
/// request merges the carried items into the node's configuration,
/// add-or-replace by name; the change lives in memory only and is not
/// written back to the configuration file. Configuration packages are
/// terminal: they never travel further down the chain.
pub struct ConfigurationHandler;

impl ConfigurationHandler {
    fn emit(level: LogLevel, action: &str, detail: String) {
        let mut meta = dispatcher::meta("confighandler", level);
        meta.corr_id = Some(dispatcher::correlation_id());
        dispatcher::emit(LogEvent::System(SystemEvent {
            meta,
            action: action.into(),
            detail: Some(detail),
        }));
    }
}

impl Handler for ConfigurationHandler {
    fn consume(&self, package: &mut Package, node: &Node) -> bool {
        if package.package_type() != PackageType::Configuration {
            return false;
        }

        let payload: Value = match serde_json::from_str(package.payload_str()) {
            Ok(value) => value,
            Err(e) => {
                Self::emit(
                    LogLevel::Warn,
                    "config_payload_invalid",
                    format!("package={} error={}", package.id(), e),
                );
                return true;
            }
        };

        match payload.get("operation").and_then(Value::as_str) {
            Some(OPERATION_READ) => {
                let Some(config) = node.configuration() else {
                    Self::emit(
                        LogLevel::Warn,
                        "config_read_without_configuration",
                        format!("package={}", package.id()),
                    );
                    return true;
                };
                Self::emit(
                    LogLevel::Info,
                    "config_read",
                    format!("reply_to={}", package.origin()),
                );
                let mut body = config.to_json();
                body["operation"] = Value::from(OPERATION_INFO);
                body["nodename"] = Value::from(node.name());
                let mut reply = Package::with_payload(PackageType::Configuration, body.to_string());
                reply.set_destination(package.origin());
                node.send_data(&reply);
            }
            Some(OPERATION_SET) => {
                Self::emit(
                    LogLevel::Info,
                    "config_set",
                    format!("from={}", package.origin()),
                );
                node.merge_config_items(&payload);
                node.show_ui_message("Configuration updated remotely.");
            }
            operation => {
                // `info` only travels outward; everything else is noise.
                Self::emit(
                    LogLevel::Debug,
                    "config_operation_ignored",
                    format!("operation={:?}", operation),
                );
            }
        }
        true
    }
}
