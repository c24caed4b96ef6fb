// src/package.rs

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Contract for structured payload objects carried by a [`Package`].
///
/// Domain layers implement this for their own data types. The runtime
/// never inspects the contents; it only clones items when packages are
/// copied and hands them to handlers.
pub trait DataItem: Send + Sync {
    /// Deep copy of the item, used when a package is cloned.
    fn clone_item(&self) -> Box<dyn DataItem>;
    /// Parse the item contents from a line of text. `content_type` tells
    /// what kind of data the text is expected to contain. Returns false
    /// if the text did not parse.
    fn parse(&mut self, text: &str, content_type: &str) -> bool;
    /// Merge data from another item into this one. Returns false if the
    /// other item had nothing this item could use.
    fn merge_from(&mut self, other: &dyn DataItem) -> bool;
    /// Structural access for observers that accept only specific item types.
    fn as_any(&self) -> &dyn Any;
}

/// Payload of a package: either raw text as it travels on the wire, or
/// a parsed [`DataItem`] owned by the package. Exactly one alternative
/// is set at a time.
pub enum Payload {
    Text(String),
    Item(Box<dyn DataItem>),
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        match self {
            Payload::Text(s) => Payload::Text(s.clone()),
            Payload::Item(item) => Payload::Item(item.clone_item()),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Payload::Item(_) => f.debug_tuple("Item").field(&"<data item>").finish(),
        }
    }
}

/// The type of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    /// The package has no type (yet); it is uninitialized.
    None,
    /// A control message (`ping`, `readfile`, `shutdown`).
    Control,
    /// Application specific data.
    Data,
    /// Node configuration data or commands.
    Configuration,
    /// Acknowledgement of a previously sent data package.
    Ack,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Control => "control",
            PackageType::Data => "data",
            PackageType::Configuration => "configuration",
            PackageType::Ack => "ack",
            PackageType::None => "",
        }
    }

    /// Unknown strings map to `None`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "control" => PackageType::Control,
            "data" => PackageType::Data,
            "configuration" => PackageType::Configuration,
            "ack" => PackageType::Ack,
            _ => PackageType::None,
        }
    }
}

/// Package encapsulates the data sent between nodes as well as passed
/// around within a node, between the readers, the handlers and the
/// writer.
///
/// Each package has a unique identifier, stable across copies. The id
/// is the equality key and correlates acknowledgements with the data
/// packages they acknowledge. The origin and destination addresses are
/// routing state used only inside a node; they are never serialized to
/// the wire.
#[derive(Debug, Clone)]
pub struct Package {
    id: Uuid,
    package_type: PackageType,
    payload: Payload,
    origin: String,
    destination: String,
}

/// Wire form of a package. Missing keys leave the target field at its
/// default; unknown keys are ignored.
#[derive(Serialize, Deserialize)]
struct WirePackage {
    #[serde(default)]
    package: Option<Uuid>,
    #[serde(rename = "type", default)]
    package_type: Option<String>,
    #[serde(default)]
    payload: Option<String>,
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

impl Package {
    /// An empty package with a fresh id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            package_type: PackageType::None,
            payload: Payload::Text(String::new()),
            origin: String::new(),
            destination: String::new(),
        }
    }

    /// A package with a type and a text payload; the id is generated.
    pub fn with_payload(package_type: PackageType, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            package_type,
            payload: Payload::Text(payload.into()),
            origin: String::new(),
            destination: String::new(),
        }
    }

    /// A package with an explicit id, type and text payload.
    pub fn with_id(id: Uuid, package_type: PackageType, payload: impl Into<String>) -> Self {
        Self {
            id,
            package_type,
            payload: Payload::Text(payload.into()),
            origin: String::new(),
            destination: String::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    pub fn set_package_type(&mut self, t: PackageType) {
        self.package_type = t;
    }

    /// The unparsed text payload. Empty if the payload has been parsed
    /// into a [`DataItem`].
    pub fn payload_str(&self) -> &str {
        match &self.payload {
            Payload::Text(s) => s,
            Payload::Item(_) => "",
        }
    }

    pub fn set_payload_str(&mut self, payload: impl Into<String>) {
        self.payload = Payload::Text(payload.into());
    }

    /// The parsed payload item, if any.
    pub fn payload_item(&self) -> Option<&dyn DataItem> {
        match &self.payload {
            Payload::Item(item) => Some(item.as_ref()),
            Payload::Text(_) => None,
        }
    }

    pub fn payload_item_mut(&mut self) -> Option<&mut Box<dyn DataItem>> {
        match &mut self.payload {
            Payload::Item(item) => Some(item),
            Payload::Text(_) => None,
        }
    }

    pub fn set_payload_item(&mut self, item: Box<dyn DataItem>) {
        self.payload = Payload::Item(item);
    }

    /// Address the package was last received from (`host:port`). Empty
    /// if the package was created locally.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = origin.into();
    }

    pub fn has_origin(&self) -> bool {
        !self.origin.is_empty()
    }

    /// Package specific destination. Empty means the node's default
    /// next hop is used.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn set_destination(&mut self, destination: impl Into<String>) {
        self.destination = destination.into();
    }

    pub fn has_destination(&self) -> bool {
        !self.destination.is_empty()
    }

    /// A package is empty iff it has no type.
    pub fn is_empty(&self) -> bool {
        self.package_type == PackageType::None
    }

    /// Listening port advertised inside the payload, if the payload is
    /// a JSON object carrying `originatingListenPort`. Senders that
    /// reply to a request use this so the answer reaches the listening
    /// socket instead of the ephemeral sending port.
    pub fn originating_listen_port(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(self.payload_str()).ok()?;
        match value.get("originatingListenPort")? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Serialize to the JSON wire form. Origin and destination are
    /// intentionally not part of it; they are derived at receive time
    /// and consumed at send time.
    pub fn as_json(&self) -> String {
        let wire = WirePackage {
            package: Some(self.id),
            package_type: Some(self.package_type.as_str().to_string()),
            payload: Some(self.payload_str().to_string()),
        };
        serde_json::to_string(&wire).unwrap_or_else(|_| "{}".into())
    }

    /// Deserialize from the JSON wire form. Returns an error when the
    /// text is not a JSON object; a well-formed object with missing
    /// keys produces a package with those fields at their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let wire: WirePackage = serde_json::from_str(json)?;
        let mut package = Package::new();
        if let Some(id) = wire.package {
            package.id = id;
        }
        if let Some(t) = wire.package_type {
            package.package_type = PackageType::from_str_lossy(&t);
        }
        if let Some(payload) = wire.payload {
            package.payload = Payload::Text(payload);
        }
        Ok(package)
    }
}

impl PartialEq for Package {
    /// Packages are equal when their ids are equal, regardless of any
    /// other field.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Package {}

impl std::hash::Hash for Package {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tally(u32);

    impl DataItem for Tally {
        fn clone_item(&self) -> Box<dyn DataItem> {
            Box::new(Tally(self.0))
        }
        fn parse(&mut self, text: &str, _content_type: &str) -> bool {
            text.parse().map(|v| self.0 = v).is_ok()
        }
        fn merge_from(&mut self, other: &dyn DataItem) -> bool {
            match other.as_any().downcast_ref::<Tally>() {
                Some(t) => {
                    self.0 += t.0;
                    true
                }
                None => false,
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn json_round_trip_preserves_identity() {
        let p = Package::with_payload(PackageType::Data, "hello");
        let decoded = Package::from_json(&p.as_json()).unwrap();
        assert_eq!(p, decoded);
        assert_eq!(decoded.package_type(), PackageType::Data);
        assert_eq!(decoded.payload_str(), "hello");
        assert!(!decoded.has_origin());
        assert!(!decoded.has_destination());
    }

    #[test]
    fn equality_is_by_id_only() {
        let a = Package::with_payload(PackageType::Data, "x");
        let mut b = Package::with_id(a.id(), PackageType::Ack, "completely different");
        b.set_origin("10.0.0.1:99");
        assert_eq!(a, b);
        let c = Package::with_payload(PackageType::Data, "x");
        assert_ne!(a, c);
    }

    #[test]
    fn empty_iff_no_type() {
        let mut p = Package::new();
        assert!(p.is_empty());
        p.set_package_type(PackageType::Control);
        assert!(!p.is_empty());
    }

    #[test]
    fn unknown_type_string_decodes_to_none() {
        let p = Package::from_json(r#"{"package":"6a1f0cde-96a4-4743-9c7b-2e51a7b08d9b","type":"telemetry","payload":"x"}"#)
            .unwrap();
        assert_eq!(p.package_type(), PackageType::None);
        assert!(p.is_empty());
    }

    #[test]
    fn missing_keys_leave_defaults() {
        let p = Package::from_json(r#"{"type":"data"}"#).unwrap();
        assert_eq!(p.package_type(), PackageType::Data);
        assert_eq!(p.payload_str(), "");
        // No "package" key: a fresh id was generated.
        assert!(!p.id().is_nil());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let p = Package::from_json(r#"{"type":"ack","payload":"ack","hop_count":3}"#).unwrap();
        assert_eq!(p.package_type(), PackageType::Ack);
        assert_eq!(p.payload_str(), "ack");
    }

    #[test]
    fn clone_duplicates_parsed_payload() {
        let mut p = Package::with_payload(PackageType::Data, "");
        p.set_payload_item(Box::new(Tally(7)));
        let copy = p.clone();
        assert_eq!(p, copy);
        let item = copy.payload_item().unwrap();
        assert_eq!(item.as_any().downcast_ref::<Tally>().unwrap().0, 7);
        // Wire form of a parsed payload is the empty string.
        assert!(copy.as_json().contains(r#""payload":"""#));
    }

    #[test]
    fn originating_listen_port_from_payload() {
        let p = Package::with_payload(
            PackageType::Configuration,
            r#"{"operation":"read","originatingListenPort":"9001"}"#,
        );
        assert_eq!(p.originating_listen_port().as_deref(), Some("9001"));
        let q = Package::with_payload(PackageType::Data, "not json");
        assert_eq!(q.originating_listen_port(), None);
        let r = Package::with_payload(
            PackageType::Configuration,
            r#"{"originatingListenPort":9002}"#,
        );
        assert_eq!(r.originating_listen_port().as_deref(), Some("9002"));
    }
}
