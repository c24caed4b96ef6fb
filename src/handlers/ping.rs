// src/handlers/ping.rs

use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, SystemEvent},
};
use crate::handlers::Handler;
use crate::node::Node;
use crate::package::{Package, PackageType};

/// Logs arriving ping control packages and forwards them to the next
/// node. The package is passed on to later handlers too, so domain
/// handlers can react to the ping as well.
pub struct PingHandler;

impl Handler for PingHandler {
    fn consume(&self, package: &mut Package, node: &Node) -> bool {
        if package.package_type() == PackageType::Control && package.payload_str() == "ping" {
            let mut meta = dispatcher::meta("ping", LogLevel::Info);
            meta.corr_id = Some(dispatcher::correlation_id());
            dispatcher::emit(LogEvent::System(SystemEvent {
                meta,
                action: "ping_forwarded".into(),
                detail: Some(format!("package={}", package.id())),
            }));
            node.send_data(package);
        }
        false
    }
}
