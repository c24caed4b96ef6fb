// src/config.rs

use std::any::Any;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::constants::CONFIG_CONTENT_TYPE;
use crate::error::NodeError;
use crate::package::DataItem;

/// Configuration item name for the port the node reads data from.
pub const CONF_INPUT: &str = "input";
/// Configuration item name for the port configuration messages arrive on.
pub const CONF_CONFIG_IN: &str = "config-in";
/// Configuration item name for the configuration reply address (reserved).
pub const CONF_CONFIG_OUT: &str = "config-out";
/// Configuration item name for the next node's `host:port`.
pub const CONF_OUTPUT: &str = "output";
/// Configuration item name for the local input data file.
pub const CONF_FILE_IN: &str = "filein";
/// Configuration item name for the local output data file.
pub const CONF_FILE_OUT: &str = "fileout";
/// Configuration item name for the logical node name.
pub const CONF_NODE_NAME: &str = "name";
/// Configuration item name selecting the cipher handler mode.
pub const CONF_ENCRYPT: &str = "encrypt";
/// Configuration item name enabling the acknowledge-and-resend protocol.
pub const CONF_USE_ACK: &str = "use-ack";

/// Returns true when a configuration value means "absent". Both the
/// literal `null` and the empty string count.
pub fn value_is_unset(value: &str) -> bool {
    value.is_empty() || value == "null"
}

/// One name/value pair of node configuration. Two items are equal when
/// their names are equal; the value does not participate.
#[derive(Debug, Clone, Default)]
pub struct ConfigItem {
    name: String,
    value: String,
}

impl ConfigItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }
}

impl PartialEq for ConfigItem {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ConfigItem {}

impl DataItem for ConfigItem {
    fn clone_item(&self) -> Box<dyn DataItem> {
        Box::new(self.clone())
    }

    /// Parses a `name<TAB>value` line. Only lines tagged with the
    /// node configuration content type are accepted.
    fn parse(&mut self, text: &str, content_type: &str) -> bool {
        if content_type != CONFIG_CONTENT_TYPE {
            return false;
        }
        match text.split_once('\t') {
            Some((name, value)) if !name.is_empty() => {
                self.name = name.trim().to_string();
                self.value = value.trim().to_string();
                true
            }
            _ => false,
        }
    }

    fn merge_from(&mut self, other: &dyn DataItem) -> bool {
        match other.as_any().downcast_ref::<ConfigItem>() {
            Some(item) if item.name == self.name => {
                self.value = item.value.clone();
                true
            }
            _ => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Observer of a line-oriented item reader. Called once per item
/// successfully parsed from a line.
pub trait ItemObserver {
    fn handle_new_item(&mut self, item: Box<dyn DataItem>);
}

/// The configuration of a node: an ordered set of [`ConfigItem`]s,
/// unique by name. Adding an item whose name already exists replaces
/// the value.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    items: Vec<ConfigItem>,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add-or-replace by name.
    pub fn add_or_replace(&mut self, item: ConfigItem) {
        match self.items.iter_mut().find(|existing| **existing == item) {
            Some(existing) => existing.set_value(item.value),
            None => self.items.push(item),
        }
    }

    /// Value for a configuration name; empty string when absent.
    pub fn value(&self, name: &str) -> String {
        self.items
            .iter()
            .find(|item| item.name() == name)
            .map(|item| item.value().to_string())
            .unwrap_or_default()
    }

    pub fn items(&self) -> &[ConfigItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// JSON form: a `configitems` array of single-key objects.
    pub fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| json!({ item.name(): item.value() }))
            .collect();
        json!({ "configitems": items })
    }

    /// Merge items from the JSON form, add-or-replace by name. Entries
    /// that are not single-key objects with string values are ignored.
    pub fn merge_json(&mut self, value: &Value) {
        let Some(items) = value.get("configitems").and_then(Value::as_array) else {
            return;
        };
        for entry in items {
            let Some(object) = entry.as_object() else {
                continue;
            };
            for (name, item_value) in object {
                if let Some(text) = item_value.as_str() {
                    self.add_or_replace(ConfigItem::new(name.clone(), text));
                }
            }
        }
    }
}

impl ItemObserver for NodeConfig {
    /// Items that are not configuration items are silently ignored.
    fn handle_new_item(&mut self, item: Box<dyn DataItem>) {
        if let Some(config_item) = item.as_any().downcast_ref::<ConfigItem>() {
            self.add_or_replace(config_item.clone());
        }
    }
}

/// Reads a node configuration file and feeds the parsed items to an
/// observer.
///
/// The file format is line oriented: the first non-empty line is the
/// content type tag and must equal `nodeconfiguration`; lines whose
/// first character is `#` are comments; every other non-empty line is
/// `name<TAB>value`. A data line that fails to parse is fatal.
pub struct ConfigurationFileReader;

impl ConfigurationFileReader {
    pub fn read(path: impl AsRef<Path>, observer: &mut dyn ItemObserver) -> Result<(), NodeError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut lines = contents.lines();

        let content_type = loop {
            match lines.next() {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line.trim().to_string(),
                None => {
                    return Err(NodeError::ConfigParse(format!(
                        "{}: empty configuration file",
                        path.display()
                    )))
                }
            }
        };
        if content_type != CONFIG_CONTENT_TYPE {
            return Err(NodeError::ConfigParse(format!(
                "{}: unexpected content type '{}'",
                path.display(),
                content_type
            )));
        }

        for (number, line) in lines.enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut item = ConfigItem::default();
            if !item.parse(line, &content_type) {
                return Err(NodeError::ConfigParse(format!(
                    "{}: bad configuration line {}",
                    path.display(),
                    number + 2
                )));
            }
            observer.handle_new_item(Box::new(item));
        }
        Ok(())
    }
}
