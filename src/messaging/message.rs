//! Broker-neutral message envelope and trace-context carrier

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::Context;

/// A single message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

/// A message as produced to, or fetched from, a topic.
///
/// `partition` and `offset` are filled in by the broker: on fetch, and on successful
/// delivery for written messages. They are `-1` until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: -1,
            offset: -1,
            key: key.into(),
            value: value.into(),
            headers: Vec::new(),
        }
    }

    /// First header with the given key
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }

    /// Set a header, replacing every existing header with the same key
    pub fn set_header(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.headers.retain(|h| h.key != key);
        self.headers.push(Header {
            key: key.to_string(),
            value: value.into(),
        });
    }

    /// Approximate wire size used for batch accounting
    pub fn size(&self) -> usize {
        self.key.len()
            + self.value.len()
            + self
                .headers
                .iter()
                .map(|h| h.key.len() + h.value.len())
                .sum::<usize>()
    }

    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Exposes message headers to an OpenTelemetry propagator
pub struct MessageCarrier<'a> {
    msg: &'a mut Message,
}

impl<'a> MessageCarrier<'a> {
    pub fn new(msg: &'a mut Message) -> Self {
        Self { msg }
    }
}

impl Injector for MessageCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.msg.set_header(key, value.into_bytes());
    }
}

impl Extractor for MessageCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.msg
            .header(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.msg.headers.iter().map(|h| h.key.as_str()).collect()
    }
}

/// Write the current trace context into the message headers
pub fn inject_context(msg: &mut Message) {
    let cx = Context::current();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut MessageCarrier::new(msg));
    });
}

/// Read a trace context from the message headers
pub fn extract_context(msg: &mut Message) -> Context {
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&MessageCarrier::new(msg))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_is_last_write_wins() {
        let mut msg = Message::new("t1", "k", "v");
        msg.headers.push(Header {
            key: "traceparent".into(),
            value: b"a".to_vec(),
        });
        msg.headers.push(Header {
            key: "traceparent".into(),
            value: b"b".to_vec(),
        });
        msg.set_header("other", "x");
        msg.set_header("traceparent", "c");

        assert_eq!(msg.headers.len(), 2);
        assert_eq!(msg.header("traceparent"), Some(&b"c"[..]));
        assert_eq!(msg.headers[1].key, "traceparent");
    }

    #[test]
    fn test_carrier_round_trips_headers() {
        let mut msg = Message::new("t1", "k", "v");
        {
            let mut carrier = MessageCarrier::new(&mut msg);
            carrier.set("tracestate", "vendor=1".to_string());
            carrier.set("baggage", "user=42".to_string());
        }

        let carrier = MessageCarrier::new(&mut msg);
        assert_eq!(carrier.get("tracestate"), Some("vendor=1"));
        assert_eq!(carrier.get("missing"), None);
        assert_eq!(carrier.keys(), vec!["tracestate", "baggage"]);
    }

    #[test]
    fn test_size_counts_headers() {
        let mut msg = Message::new("t1", "key", "value");
        assert_eq!(msg.size(), 8);
        msg.set_header("h", "12");
        assert_eq!(msg.size(), 11);
    }
}
