//! pipenode public prelude (curated stable-intent exports).
//! Import with: `use pipenode::prelude::*;`

pub use crate::config::{ConfigItem, NodeConfig};
pub use crate::error::NodeError;
pub use crate::handlers::{CipherMode, EncryptHandler, Handler};
pub use crate::node::{Node, NodeEvent, NodeObserver};
pub use crate::package::{DataItem, Package, PackageType, Payload};
