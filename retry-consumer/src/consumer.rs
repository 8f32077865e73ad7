use std::time::Duration;

use common_kafka::kafka_consumer::{ReceivedMessage, RecvErr, SingleTopicConsumer};
use health::HealthHandle;
use metrics::counter;
use retry_common::headers::{carry_forward, HeaderError, ProvenanceHeaders};
use retry_common::policy::{RetryDecision, RetryPolicy};
use retry_common::sink::{MessageSink, OutgoingMessage};
use tracing::{debug, error, info};

use crate::error::ConsumerError;

pub const MESSAGES_RECEIVED: &str = "retry_messages_received_total";
pub const MESSAGES_REPUBLISHED: &str = "retry_messages_republished_total";
pub const MESSAGES_DEFERRED: &str = "retry_messages_deferred_total";
pub const MESSAGES_DISCARDED: &str = "retry_messages_discarded_total";
pub const MESSAGES_DROPPED: &str = "retry_messages_dropped_total";

/// What to do with one retry-topic delivery. Control flow is carried in this
/// value, not in errors: only the defer arm withholds acknowledgment, and
/// true error propagation is reserved for broker failures.
#[derive(Debug)]
pub enum Disposition {
    /// Ready to go again: publish to the origin topic, then acknowledge.
    Republish(OutgoingMessage),
    /// Retry budget exhausted: acknowledge and forget.
    Discard,
    /// Not yet time: leave unacknowledged so the broker re-presents it after
    /// a pause.
    Defer,
    /// Unusable provenance: acknowledge and log, one bad message must not
    /// stop the stream.
    Drop(HeaderError),
}

/// Evaluate a delivery against the retry policy. Pure: all broker
/// interaction happens in the loop, driven by the returned disposition.
pub fn evaluate(policy: &RetryPolicy, now: i64, message: &ReceivedMessage) -> Disposition {
    let provenance = match ProvenanceHeaders::from_kafka(&message.headers) {
        Ok(provenance) => provenance,
        Err(err) => return Disposition::Drop(err),
    };
    let (first_seen, origin_topic) = match provenance.stamped() {
        Ok(stamped) => stamped,
        Err(err) => return Disposition::Drop(err),
    };

    match policy.decide(now, message.received_at, first_seen) {
        RetryDecision::Discard => Disposition::Discard,
        RetryDecision::Delay => Disposition::Defer,
        RetryDecision::RetryNow => Disposition::Republish(OutgoingMessage {
            topic: origin_topic.to_owned(),
            payload: message.payload.clone(),
            // Only the timestamp is carried forward: the destination is the
            // origin topic itself
            headers: carry_forward(first_seen),
        }),
    }
}

/// The retry consumer loop: evaluates every delivery on the retry topic and
/// replays, defers or discards it.
pub struct RetryConsumer<S> {
    consumer: SingleTopicConsumer,
    sink: S,
    policy: RetryPolicy,
    redeliver_pause: Duration,
    liveness: HealthHandle,
}

impl<S: MessageSink> RetryConsumer<S> {
    pub fn new(
        consumer: SingleTopicConsumer,
        sink: S,
        policy: RetryPolicy,
        redeliver_pause: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            consumer,
            sink,
            policy,
            redeliver_pause,
            liveness,
        }
    }

    /// Run until the broker connection fails. Individual messages never
    /// break the loop: malformed ones are dropped, failed republishes are
    /// logged and acknowledged (we accept losing a message over risking an
    /// unbounded redelivery storm).
    pub async fn run(&self) -> Result<(), ConsumerError> {
        loop {
            self.liveness.report_healthy().await;

            let (message, delivery) = match self.consumer.recv().await {
                Ok(received) => received,
                Err(RecvErr::Empty) => {
                    counter!(MESSAGES_DROPPED, "cause" => "empty_payload").increment(1);
                    continue;
                }
                Err(RecvErr::Kafka(err)) => return Err(err.into()),
            };
            counter!(MESSAGES_RECEIVED).increment(1);

            let now = chrono::Utc::now().timestamp_millis();
            match evaluate(&self.policy, now, &message) {
                Disposition::Republish(outgoing) => {
                    debug!(
                        topic = %outgoing.topic,
                        "message is ready to retry, sending back to its origin topic"
                    );
                    match self.sink.send(outgoing).await {
                        Ok(()) => counter!(MESSAGES_REPUBLISHED).increment(1),
                        Err(err) => {
                            error!("failed to replay message to its origin topic: {}", err);
                            counter!(MESSAGES_DROPPED, "cause" => "republish_failed")
                                .increment(1);
                        }
                    }
                    delivery.ack()?;
                }
                Disposition::Discard => {
                    info!(
                        received_at = message.received_at,
                        "message exceeded its total retry duration, discarding"
                    );
                    counter!(MESSAGES_DISCARDED).increment(1);
                    delivery.ack()?;
                }
                Disposition::Defer => {
                    debug!("message is not yet ready to retry, deferring");
                    counter!(MESSAGES_DEFERRED).increment(1);
                    delivery.defer()?;
                    tokio::time::sleep(self.redeliver_pause).await;
                }
                Disposition::Drop(err) => {
                    error!("dropping malformed retry message: {}", err);
                    counter!(MESSAGES_DROPPED, "cause" => "malformed_headers").increment(1);
                    delivery.ack()?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{Header, OwnedHeaders};
    use retry_common::headers::{ORIGINAL_RECEIVED_TIMESTAMP, ORIGINAL_RECEIVED_TOPIC};

    const NOW: i64 = 1_700_000_000_000;

    fn policy() -> RetryPolicy {
        // 10s between attempts, 30s total budget
        RetryPolicy::new(10, 30).unwrap()
    }

    fn retry_delivery(received_at: i64, first_seen: i64) -> ReceivedMessage {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: ORIGINAL_RECEIVED_TIMESTAMP,
                value: Some(first_seen.to_string().as_bytes()),
            })
            .insert(Header {
                key: ORIGINAL_RECEIVED_TOPIC,
                value: Some(b"update-item"),
            });

        ReceivedMessage {
            payload: br#"{"id":"a1","status":"ACTIVE"}"#.to_vec(),
            received_at,
            headers,
            topic: "messaging-retry".to_owned(),
        }
    }

    #[test]
    fn discards_past_the_retry_budget() {
        // First seen 31s ago, 30s budget
        let message = retry_delivery(NOW - 11_000, NOW - 31_000);

        assert!(matches!(
            evaluate(&policy(), NOW, &message),
            Disposition::Discard
        ));
    }

    #[test]
    fn republishes_to_the_origin_topic_carrying_the_first_seen_timestamp() {
        // 29s into the budget, delivered 11s ago: ready to go again
        let message = retry_delivery(NOW - 11_000, NOW - 29_000);

        let Disposition::Republish(outgoing) = evaluate(&policy(), NOW, &message) else {
            panic!("expected a republish disposition");
        };

        assert_eq!(outgoing.topic, "update-item");
        assert_eq!(outgoing.payload, message.payload);

        // The replayed record carries the first-seen timestamp but not the
        // topic header
        let provenance = ProvenanceHeaders::from_kafka(&outgoing.headers).unwrap();
        assert_eq!(provenance.original_received_timestamp, Some(NOW - 29_000));
        assert_eq!(provenance.original_received_topic, None);
    }

    #[test]
    fn defers_when_the_interval_has_not_elapsed() {
        // 29s into the budget but this delivery is only 9s old
        let message = retry_delivery(NOW - 9_000, NOW - 29_000);

        assert!(matches!(
            evaluate(&policy(), NOW, &message),
            Disposition::Defer
        ));
    }

    #[test]
    fn drops_a_delivery_without_provenance() {
        let message = ReceivedMessage {
            payload: b"{}".to_vec(),
            received_at: NOW,
            headers: OwnedHeaders::new(),
            topic: "messaging-retry".to_owned(),
        };

        assert!(matches!(
            evaluate(&policy(), NOW, &message),
            Disposition::Drop(HeaderError::MissingOriginalTimestamp)
        ));
    }

    #[test]
    fn drops_a_delivery_with_half_stamped_provenance() {
        let message = ReceivedMessage {
            payload: b"{}".to_vec(),
            received_at: NOW,
            headers: carry_forward(NOW - 5_000),
            topic: "messaging-retry".to_owned(),
        };

        assert!(matches!(
            evaluate(&policy(), NOW, &message),
            Disposition::Drop(HeaderError::MissingOriginalTopic)
        ));
    }
}
