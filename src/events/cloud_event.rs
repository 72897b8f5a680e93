use chrono::{DateTime, SecondsFormat, Utc};

/// Event metadata as described by the CloudEvents v1.0 spec.
///
/// Projected onto `ce-*` message headers per the NATS protocol binding.
/// The metadata never reaches handlers; it is for middlewares and
/// third-party tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEvent {
    /// Identifies the event. Also used as the deduplication id when no
    /// explicit `uid` is given on emit.
    pub id: String,
    /// Identifies the context in which the event happened.
    pub source: String,
    /// Describes the type of the event.
    pub ty: String,
    /// The CloudEvents spec version.
    pub specversion: String,

    /// Content type of `data`, e.g. `application/json`.
    pub datacontenttype: Option<String>,
    /// URI of the schema `data` adheres to.
    pub dataschema: Option<String>,
    /// Subject of the event in the context of the producer.
    pub subject: Option<String>,
    /// When the occurrence happened.
    pub time: Option<DateTime<Utc>>,

    // extension attributes
    /// Reference to a location where the event payload is stored.
    pub dataref: Option<String>,
    /// Partition routing hint.
    pub partitionkey: Option<String>,
    /// Rate at which this event was sampled.
    pub sampledrate: Option<i64>,
    /// Order of the event in the originating sequence.
    pub sequence: Option<String>,
    /// W3C trace parent.
    pub traceparent: Option<String>,
    /// W3C trace state.
    pub tracestate: Option<String>,
}

impl CloudEvent {
    /// Build the metadata from the three required attributes.
    pub fn new(id: &str, source: &str, ty: &str) -> Self {
        Self {
            id: id.to_owned(),
            source: source.to_owned(),
            ty: ty.to_owned(),
            specversion: "1.0".to_owned(),
            datacontenttype: None,
            dataschema: None,
            subject: None,
            time: None,
            dataref: None,
            partitionkey: None,
            sampledrate: None,
            sequence: None,
            traceparent: None,
            tracestate: None,
        }
    }

    /// When the occurrence happened.
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Produce NATS-compatible headers from the metadata.
    pub fn as_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("ce-id".to_owned(), self.id.clone()),
            ("ce-source".to_owned(), self.source.clone()),
            ("ce-type".to_owned(), self.ty.clone()),
            ("ce-specversion".to_owned(), self.specversion.clone()),
        ];
        let optional = [
            ("ce-datacontenttype", &self.datacontenttype),
            ("ce-dataschema", &self.dataschema),
            ("ce-subject", &self.subject),
            ("ce-dataref", &self.dataref),
            ("ce-partitionkey", &self.partitionkey),
            ("ce-sequence", &self.sequence),
            ("ce-traceparent", &self.traceparent),
            ("ce-tracestate", &self.tracestate),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                headers.push((name.to_owned(), value.clone()));
            }
        }
        if let Some(rate) = self.sampledrate {
            headers.push(("ce-sampledrate".to_owned(), rate.to_string()));
        }
        if let Some(time) = self.time {
            headers.push((
                "ce-time".to_owned(),
                time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_attributes_are_projected() {
        let meta = CloudEvent::new("41", "/orders", "order-placed");
        let headers = meta.as_headers();
        assert!(headers.contains(&("ce-id".to_owned(), "41".to_owned())));
        assert!(headers.contains(&("ce-source".to_owned(), "/orders".to_owned())));
        assert!(headers.contains(&("ce-type".to_owned(), "order-placed".to_owned())));
        assert!(headers.contains(&("ce-specversion".to_owned(), "1.0".to_owned())));
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn time_is_rfc3339_with_trailing_z() {
        let time: DateTime<Utc> = "2022-12-07T20:03:15Z".parse().unwrap();
        let meta = CloudEvent::new("41", "/orders", "order-placed").time(time);
        let headers = meta.as_headers();
        let (_, value) = headers.iter().find(|(k, _)| k == "ce-time").unwrap();
        assert!(value.ends_with('Z'), "got {value}");
        assert!(value.starts_with("2022-12-07T20:03:15"));
    }
}
