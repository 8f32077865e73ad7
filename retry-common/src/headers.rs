use rdkafka::message::{Header, Headers, OwnedHeaders};

/// Wire names of the provenance headers. These are a cross-service contract:
/// every producer and consumer of the retry topic reads and writes these
/// exact strings.
pub const ORIGINAL_RECEIVED_TIMESTAMP: &str = "original-received-timestamp";
pub const ORIGINAL_RECEIVED_TOPIC: &str = "original-received-topic";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("{0} header is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("{0:?} is not a millisecond timestamp")]
    InvalidTimestamp(String),
    #[error("missing original-received-timestamp header")]
    MissingOriginalTimestamp,
    #[error("missing original-received-topic header")]
    MissingOriginalTopic,
}

/// Provenance carried across retry hops: when a message was first seen, and
/// which topic it should return to once its dependency shows up.
///
/// Both fields are stamped together, exactly once, on the first handoff to
/// the retry topic and are never rewritten afterwards. A message republished
/// back to its origin topic carries only the timestamp (the destination *is*
/// the origin), so either field can legitimately be absent here; consumers
/// that require both go through [`ProvenanceHeaders::stamped`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceHeaders {
    pub original_received_timestamp: Option<i64>,
    pub original_received_topic: Option<String>,
}

impl ProvenanceHeaders {
    /// Extract provenance from a delivery's Kafka headers. Unknown headers are
    /// ignored; unparseable values for our headers are an error, since a
    /// half-readable provenance set cannot be acted on safely.
    pub fn from_kafka(headers: &OwnedHeaders) -> Result<Self, HeaderError> {
        let mut provenance = ProvenanceHeaders::default();

        for header in headers.iter() {
            match header.key {
                ORIGINAL_RECEIVED_TIMESTAMP => {
                    let value = std::str::from_utf8(header.value.unwrap_or_default())
                        .map_err(|_| HeaderError::InvalidUtf8(ORIGINAL_RECEIVED_TIMESTAMP))?;
                    let millis = value
                        .parse::<i64>()
                        .map_err(|_| HeaderError::InvalidTimestamp(value.to_owned()))?;
                    provenance.original_received_timestamp = Some(millis);
                }
                ORIGINAL_RECEIVED_TOPIC => {
                    let value = std::str::from_utf8(header.value.unwrap_or_default())
                        .map_err(|_| HeaderError::InvalidUtf8(ORIGINAL_RECEIVED_TOPIC))?;
                    provenance.original_received_topic = Some(value.to_owned());
                }
                _ => {}
            }
        }

        Ok(provenance)
    }

    /// The full provenance pair, required when evaluating a retry-topic
    /// delivery. A message on the retry topic with only one of the two
    /// headers was produced by a broken stamper and cannot be retried.
    pub fn stamped(&self) -> Result<(i64, &str), HeaderError> {
        let timestamp = self
            .original_received_timestamp
            .ok_or(HeaderError::MissingOriginalTimestamp)?;
        let topic = self
            .original_received_topic
            .as_deref()
            .ok_or(HeaderError::MissingOriginalTopic)?;
        Ok((timestamp, topic))
    }
}

/// Headers for a message going back to its origin topic: the first-seen
/// timestamp is carried forward so a subsequent failure keeps the original
/// retry budget, but no topic header is attached.
pub fn carry_forward(original_received_timestamp: i64) -> OwnedHeaders {
    OwnedHeaders::new().insert(Header {
        key: ORIGINAL_RECEIVED_TIMESTAMP,
        value: Some(original_received_timestamp.to_string().as_bytes()),
    })
}
