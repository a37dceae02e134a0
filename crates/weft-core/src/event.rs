//! Events: prioritized records of something happening in the graph or
//! metadata layer.
//!
//! An event is immutable once constructed, apart from an opaque key/value
//! side-channel that hooks use to exchange data while the event is being
//! dispatched. Construction inherits the subject's properties and
//! global-properties (if any), overlays the event's own properties, and
//! stamps `event.type` last.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cancellation::CancellationToken;
use crate::interest::{GraphObject, ObjectType};
use crate::json::Json;
use crate::properties::Properties;

/// Well-known event property keys.
pub mod keys {
    /// Set by the event constructor; the event's type string.
    pub const EVENT_TYPE: &str = "event.type";
    /// Conventional: the type name of the event's subject.
    pub const SUBJECT_TYPE: &str = "event.subject.type";
    /// Conventional: the param id the event is about.
    pub const SUBJECT_PARAM_ID: &str = "event.subject.param-id";
    /// Conventional: the name of the metadata object involved.
    pub const METADATA_NAME: &str = "metadata.name";
}

/// A prioritized event, carrying enough context for a hook to act.
pub struct Event {
    event_type: String,
    priority: i32,
    properties: Properties,
    source: Option<Arc<dyn GraphObject>>,
    subject: Option<Arc<dyn GraphObject>>,
    cancellation: CancellationToken,
    /// Opaque side-channel for data exchanged between hooks of this event.
    data: Mutex<HashMap<String, Json>>,
}

impl Event {
    /// Creates a new event.
    ///
    /// The event's property bag starts from the subject's properties and
    /// global-properties (when a subject is given), is overlaid with
    /// `properties`, and finally carries `event.type`.
    pub fn new(
        event_type: &str,
        priority: i32,
        properties: Option<Properties>,
        source: Option<Arc<dyn GraphObject>>,
        subject: Option<Arc<dyn GraphObject>>,
    ) -> Event {
        let mut bag = Properties::new();
        if let Some(subject) = &subject {
            if let Some(props) = subject.properties() {
                bag.update(&props);
            }
            if let Some(global) = subject.global_properties() {
                bag.update(&global);
            }
        }
        if let Some(own) = properties {
            bag.update(&own);
        }
        bag.set(keys::EVENT_TYPE, Some(event_type));

        let event = Event {
            event_type: event_type.to_string(),
            priority,
            properties: bag,
            source,
            subject,
            cancellation: CancellationToken::new(),
            data: Mutex::new(HashMap::new()),
        };
        log::trace!(target: "weft-event", "event({}) created", event.name());
        event
    }

    /// The event's type string.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn source(&self) -> Option<Arc<dyn GraphObject>> {
        self.source.clone()
    }

    pub fn subject(&self) -> Option<Arc<dyn GraphObject>> {
        self.subject.clone()
    }

    /// The token that tracks whether this event has been stopped.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Stops processing of this event: no further hooks will run and the
    /// dispatcher will discard it.
    pub fn stop_processing(&self) {
        log::debug!(target: "weft-event", "stopping event({})", self.name());
        self.cancellation.cancel();
    }

    /// Stores `data` under `key` on the event's side-channel, or removes
    /// the key when `data` is `None`.
    pub fn set_data(&self, key: &str, data: Option<Json>) {
        let mut map = self.data.lock().unwrap();
        match data {
            Some(data) => {
                map.insert(key.to_string(), data);
            }
            None => {
                map.remove(key);
            }
        }
    }

    /// Fetches data previously stored with [`set_data`](Self::set_data).
    pub fn get_data(&self, key: &str) -> Option<Json> {
        self.data.lock().unwrap().get(key).cloned()
    }

    /// The display name:
    /// `<{address}>type@subject-type@metadata-name@param-id`,
    /// omitting absent parts.
    pub fn name(&self) -> String {
        let props = &self.properties;
        let event_type = props.get(keys::EVENT_TYPE);
        let subject_type = props.get(keys::SUBJECT_TYPE);
        let metadata_name = props.get(keys::METADATA_NAME);
        let param = props.get(keys::SUBJECT_PARAM_ID);

        format!(
            "<{:p}>{}{}{}{}{}{}{}",
            self as *const Event,
            event_type.unwrap_or(""),
            if event_type.is_some() && subject_type.is_some() { "@" } else { "" },
            subject_type.unwrap_or(""),
            if subject_type.is_some() && metadata_name.is_some() { "@" } else { "" },
            metadata_name.unwrap_or(""),
            if subject_type.is_some() && param.is_some() { "@" } else { "" },
            param.unwrap_or(""),
        )
    }
}

/// Events are themselves matchable subjects: hook interests on
/// [`ObjectType::Event`] match against the event's property bag.
impl GraphObject for Event {
    fn object_type(&self) -> ObjectType {
        ObjectType::Event
    }

    fn properties(&self) -> Option<Properties> {
        Some(self.properties.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSubject;

    impl GraphObject for FakeSubject {
        fn object_type(&self) -> ObjectType {
            ObjectType::Node
        }
        fn properties(&self) -> Option<Properties> {
            Some(Properties::from_pairs([("node.name", "speaker"), ("shared", "from-subject")]))
        }
        fn global_properties(&self) -> Option<Properties> {
            Some(Properties::from_pairs([("object.id", "7")]))
        }
    }

    #[test]
    fn constructor_stamps_event_type() {
        let event = Event::new("node-added", 10, None, None, None);
        assert_eq!(event.properties().get("event.type"), Some("node-added"));
        assert_eq!(event.event_type(), "node-added");
        assert_eq!(event.priority(), 10);
    }

    #[test]
    fn subject_properties_are_inherited_and_overlaid() {
        let props = Properties::from_pairs([("shared", "from-event")]);
        let event =
            Event::new("node-added", 0, Some(props), None, Some(Arc::new(FakeSubject)));
        // subject props inherited
        assert_eq!(event.properties().get("node.name"), Some("speaker"));
        assert_eq!(event.properties().get("object.id"), Some("7"));
        // the event's own properties win
        assert_eq!(event.properties().get("shared"), Some("from-event"));
    }

    #[test]
    fn display_name_omits_absent_parts() {
        let event = Event::new("select-target", 0, None, None, None);
        let name = event.name();
        assert!(name.ends_with(">select-target"), "got {name}");

        let props = Properties::from_pairs([
            ("event.subject.type", "node"),
            ("event.subject.param-id", "Props"),
        ]);
        let event = Event::new("params-changed", 0, Some(props), None, None);
        let name = event.name();
        assert!(name.ends_with(">params-changed@node@Props"), "got {name}");
    }

    #[test]
    fn data_side_channel() {
        let event = Event::new("x", 0, None, None, None);
        assert!(event.get_data("k").is_none());
        event.set_data("k", Some(Json::int(5)));
        assert_eq!(event.get_data("k").unwrap().as_int(), Some(5));
        event.set_data("k", None);
        assert!(event.get_data("k").is_none());
    }

    #[test]
    fn stop_processing_sets_the_token() {
        let event = Event::new("x", 0, None, None, None);
        assert!(!event.cancellation().is_cancelled());
        event.stop_processing();
        assert!(event.cancellation().is_cancelled());
    }
}
