use rdkafka::message::{Header, OwnedHeaders};

use crate::headers::{ProvenanceHeaders, ORIGINAL_RECEIVED_TIMESTAMP, ORIGINAL_RECEIVED_TOPIC};

/// An envelope ready for the retry topic: the target topic plus the
/// provenance pair to attach. Publishing is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped {
    /// Always the configured retry topic.
    pub topic: String,
    pub original_received_timestamp: i64,
    pub original_received_topic: String,
}

impl Stamped {
    /// Render the provenance pair as Kafka headers for the outgoing record.
    pub fn headers(&self) -> OwnedHeaders {
        OwnedHeaders::new()
            .insert(Header {
                key: ORIGINAL_RECEIVED_TIMESTAMP,
                value: Some(self.original_received_timestamp.to_string().as_bytes()),
            })
            .insert(Header {
                key: ORIGINAL_RECEIVED_TOPIC,
                value: Some(self.original_received_topic.as_bytes()),
            })
    }
}

/// Computes the provenance headers for a message being handed off to the
/// retry topic after a processing failure.
///
/// Stamping happens exactly once, at the first failure: from then on the
/// original receipt timestamp and origin topic ride along unchanged through
/// every retry hop, so the retry budget is measured from the very first
/// delivery and the message always finds its way back to the topic it came
/// from.
#[derive(Debug, Clone)]
pub struct RetryStamper {
    retry_topic: String,
}

impl RetryStamper {
    pub fn new(retry_topic: &str) -> Self {
        Self {
            retry_topic: retry_topic.to_owned(),
        }
    }

    /// Build the outgoing envelope for a failed delivery.
    ///
    /// `received_at` and `source_topic` describe the delivery that just
    /// failed; `inbound` is whatever provenance that delivery already
    /// carried. On a first failure the provenance is stamped from the
    /// delivery itself. A delivery that already carries a first-seen
    /// timestamp keeps it - re-stamping on later passes would quietly reset
    /// the retry budget. The origin topic falls back to `source_topic`,
    /// which covers messages that failed again after being replayed to their
    /// origin (those carry the timestamp but, by design, no topic header).
    pub fn stamp(
        &self,
        received_at: i64,
        source_topic: &str,
        inbound: &ProvenanceHeaders,
    ) -> Stamped {
        let original_received_timestamp =
            inbound.original_received_timestamp.unwrap_or(received_at);
        let original_received_topic = inbound
            .original_received_topic
            .clone()
            .unwrap_or_else(|| source_topic.to_owned());

        Stamped {
            topic: self.retry_topic.clone(),
            original_received_timestamp,
            original_received_topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_stamps_from_the_delivery() {
        let stamper = RetryStamper::new("messaging-retry");

        let stamped = stamper.stamp(1_700_000_000_000, "update-item", &ProvenanceHeaders::default());

        assert_eq!(
            stamped,
            Stamped {
                topic: "messaging-retry".to_owned(),
                original_received_timestamp: 1_700_000_000_000,
                original_received_topic: "update-item".to_owned(),
            }
        );
    }

    #[test]
    fn stamping_is_idempotent() {
        let stamper = RetryStamper::new("messaging-retry");

        let first = stamper.stamp(1_700_000_000_000, "update-item", &ProvenanceHeaders::default());

        // A second pass through the stamper, minutes later, must not touch
        // the provenance
        let inbound = ProvenanceHeaders {
            original_received_timestamp: Some(first.original_received_timestamp),
            original_received_topic: Some(first.original_received_topic.clone()),
        };
        let second = stamper.stamp(1_700_000_120_000, "messaging-retry", &inbound);

        assert_eq!(second, first);
    }

    #[test]
    fn refailure_after_replay_keeps_the_first_seen_timestamp() {
        let stamper = RetryStamper::new("messaging-retry");

        // A replayed message carries only the timestamp; the origin topic is
        // the topic it was just consumed from
        let inbound = ProvenanceHeaders {
            original_received_timestamp: Some(1_700_000_000_000),
            original_received_topic: None,
        };
        let stamped = stamper.stamp(1_700_000_015_000, "update-item", &inbound);

        assert_eq!(stamped.original_received_timestamp, 1_700_000_000_000);
        assert_eq!(stamped.original_received_topic, "update-item");
    }

    #[test]
    fn rendered_headers_roundtrip() {
        let stamped = Stamped {
            topic: "messaging-retry".to_owned(),
            original_received_timestamp: 1_700_000_000_000,
            original_received_topic: "update-item".to_owned(),
        };

        let parsed = ProvenanceHeaders::from_kafka(&stamped.headers()).unwrap();
        assert_eq!(parsed.stamped(), Ok((1_700_000_000_000, "update-item")));
    }
}
