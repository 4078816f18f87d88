use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::message::{Message, Outcome, Response};
use super::queue::MessageBuffer;
use crate::utils::error::Error;
use crate::utils::listeners::Effect;

fn run(effect: Option<Effect>) -> bool {
    match effect {
        Some(effect) => {
            effect();
            true
        }
        None => false,
    }
}

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn sent(id: &str, topic: &str, at: u64) -> Message {
    let message = Message::new(id, topic, 0);
    message.send(json!({"q": id})).unwrap();
    message.mark_sent("transport-a", at);
    message
}

#[test]
fn test_enqueue_deduplicates_by_id() {
    let mut buffer = MessageBuffer::new();
    assert!(buffer.enqueue(Message::new("m1", "a", 0)));
    assert!(!buffer.enqueue(Message::new("m1", "b", 0)));

    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.get("m1").unwrap().topic(), "a");
}

#[test]
fn test_send_twice_is_already_scheduled() {
    let message = Message::new("m1", "t", 0);
    message.send("first").unwrap();

    assert!(matches!(
        message.send("again"),
        Err(Error::AlreadyScheduled { id }) if id == "m1"
    ));
    assert!(matches!(
        message.notify("again"),
        Err(Error::AlreadyScheduled { .. })
    ));
    assert!(!message.is_notification());
}

#[test]
fn test_binary_payload_is_rejected() {
    let message = Message::new("m1", "t", 0);
    assert!(matches!(
        message.send(vec![1u8, 2]),
        Err(Error::UnsupportedPayloadType)
    ));
    // a rejected send leaves the message unscheduled
    assert!(!message.is_ready());
    message.notify(json!(null)).unwrap();
    assert!(message.is_notification());
}

#[test]
fn test_complete_runs_then_before_finally_once() {
    let seen = recorder();
    let message = sent("m1", "t", 10);
    {
        let seen = seen.clone();
        message.then(move |_, response| {
            seen.lock().unwrap().push(format!("then:{}", response.payload));
        });
    }
    {
        let seen = seen.clone();
        message.finally(move |_, outcome| {
            let label = match outcome {
                Outcome::Completed(_) => "completed",
                _ => "other",
            };
            seen.lock().unwrap().push(format!("finally:{label}"));
        });
    }

    assert!(run(message.set_response_payload(json!("ok"), 20)));
    assert!(message.is_finalized());
    assert_eq!(message.responded_at(), Some(20));

    // second completion attempt is ignored
    assert!(!run(message.complete_failed(json!("late"))));
    assert!(!run(message.complete_timed_out()));

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["then:\"ok\"".to_string(), "finally:completed".to_string()]
    );
}

#[test]
fn test_finally_runs_after_panicking_listener() {
    let seen = recorder();
    let message = sent("m1", "t", 0);
    message.or_else(|_, _| panic!("handler failed"));
    {
        let seen = seen.clone();
        message.or_else(move |_, error| seen.lock().unwrap().push(format!("error:{error}")));
    }
    {
        let seen = seen.clone();
        message.finally(move |_, outcome| {
            assert_eq!(outcome, &Outcome::Failed(json!("bad")));
            seen.lock().unwrap().push("finally".into());
        });
    }

    assert!(run(message.complete_failed(json!("bad"))));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["error:\"bad\"".to_string(), "finally".to_string()]
    );
}

#[test]
fn test_cancelled_message_never_completes() {
    let message = sent("m1", "t", 0);
    let called = recorder();
    {
        let called = called.clone();
        message.then(move |_, _| called.lock().unwrap().push("then".into()));
    }
    {
        let called = called.clone();
        message.when_acknowledged(move |_, _| called.lock().unwrap().push("ack".into()));
    }

    message.cancel();
    assert!(!run(message.acknowledge(5)));
    assert!(!run(message.set_response_payload(json!(1), 6)));
    assert!(!run(message.complete_ack_timed_out()));
    assert!(called.lock().unwrap().is_empty());
    assert!(!message.is_finalized());
}

#[test]
fn test_acknowledgement_does_not_finalize_request() {
    let message = sent("m1", "t", 0);
    let at = Arc::new(Mutex::new(None));
    {
        let at = at.clone();
        message.when_acknowledged(move |_, when| *at.lock().unwrap() = Some(when));
    }

    assert!(run(message.acknowledge(7)));
    assert_eq!(*at.lock().unwrap(), Some(7));
    assert_eq!(message.acknowledged_at(), Some(7));
    assert!(!message.is_finalized());
    assert!(!message.is_acknowledged_notification());
}

#[test]
fn test_late_acknowledgement_after_finalize_still_notifies() {
    let message = sent("m1", "t", 0);
    let count = recorder();
    {
        let count = count.clone();
        message.when_acknowledged(move |_, _| count.lock().unwrap().push("ack".into()));
    }

    run(message.set_response_payload(json!(1), 3));
    assert!(message.is_finalized());
    assert!(run(message.acknowledge(4)));
    assert_eq!(count.lock().unwrap().len(), 1);
}

fn attachment_message(seen: &Arc<Mutex<Vec<Response>>>) -> Message {
    let message = sent("m1", "t", 0);
    message.expect_attachment();
    let seen = seen.clone();
    message.then(move |_, response| seen.lock().unwrap().push(response.clone()));
    message
}

#[test]
fn test_attachment_completion_payload_first() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let message = attachment_message(&seen);

    assert!(!run(message.set_response_payload(json!({"n": 1}), 5)));
    assert!(!message.is_finalized());
    assert!(run(message.set_response_attachment(b"img".to_vec(), 6)));
    assert!(message.is_finalized());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Response {
            payload: json!({"n": 1}),
            attachment: Some(b"img".to_vec()),
        }]
    );
}

#[test]
fn test_attachment_completion_attachment_first() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let message = attachment_message(&seen);

    assert!(!run(message.set_response_attachment(b"img".to_vec(), 5)));
    assert!(!message.is_finalized());
    assert!(run(message.set_response_payload(json!({"n": 1}), 6)));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Response {
            payload: json!({"n": 1}),
            attachment: Some(b"img".to_vec()),
        }]
    );
    assert_eq!(message.responded_at(), Some(6));
}

#[test]
fn test_timeouts_are_false_until_sent() {
    let message = Message::new("m1", "t", 0);
    message
        .with_timeout(Duration::from_millis(50))
        .with_ack_timeout(Duration::from_millis(20));
    message.send(json!(1)).unwrap();

    assert!(!message.is_timed_out(1_000));
    assert!(!message.is_ack_timed_out(1_000));

    message.mark_sent("transport-a", 100);
    assert!(!message.is_ack_timed_out(119));
    assert!(message.is_ack_timed_out(120));
    assert!(!message.is_timed_out(149));
    assert!(message.is_timed_out(150));

    run(message.acknowledge(110));
    assert!(!message.is_ack_timed_out(500));
}

#[test]
fn test_reschedule_clears_delivery_state() {
    let message = sent("m1", "t", 10);
    run(message.acknowledge(12));
    message.expect_attachment();
    run(message.set_response_payload(json!("partial"), 13));

    message.reschedule();
    assert!(message.is_unsent());
    assert_eq!(message.sent_at(), None);
    assert_eq!(message.acknowledged_at(), None);
    assert_eq!(message.response(), None);
    assert_eq!(message.transport_id(), None);
    assert!(message.is_ready());
}

#[test]
fn test_reschedule_is_noop_when_finalized() {
    let message = sent("m1", "t", 10);
    run(message.complete_timed_out());
    message.reschedule();
    assert_eq!(message.sent_at(), Some(10));
}

#[test]
fn test_frame_carries_notify_flag() {
    let message = Message::new("m1", "t", 0);
    assert!(message.frame().is_none());

    message.notify(json!({"k": "v"})).unwrap();
    match message.frame() {
        Some(crate::transport::ClientFrame::Message {
            id, topic, payload, notify,
        }) => {
            assert_eq!(id, "m1");
            assert_eq!(topic, "t");
            assert_eq!(payload, json!({"k": "v"}));
            assert!(notify);
        }
        other => panic!("Expected message frame, got {other:?}"),
    }
}

#[test]
fn test_buffer_views() {
    let mut buffer = MessageBuffer::new();
    let unsent = Message::new("u", "a", 0);
    unsent.send(Value::Null).unwrap();
    let idle = Message::new("idle", "a", 0);
    let lost = sent("lost", "b", 0);
    let timed = sent("timed", "b", 0);
    timed.with_timeout(Duration::from_millis(10));

    for message in [&unsent, &idle, &lost, &timed] {
        buffer.enqueue(message.clone());
    }

    let ids = |messages: Vec<Message>| -> Vec<String> {
        messages.iter().map(|m| m.id().to_string()).collect()
    };
    assert_eq!(ids(buffer.for_topic("a")), vec!["u", "idle"]);
    assert_eq!(ids(buffer.unsent()), vec!["u"]);
    assert_eq!(ids(buffer.timed_out(10)), vec!["timed"]);
    assert!(buffer.ack_timed_out(10).is_empty());
    assert_eq!(ids(buffer.lost_transport("transport-b")), vec!["lost", "timed"]);
    assert!(buffer.lost_transport("transport-a").is_empty());
}

#[test]
fn test_buffer_removal_policies() {
    let mut buffer = MessageBuffer::new();

    let cancelled = Message::new("cancelled", "t", 0);
    cancelled.cancel();
    let notification = Message::new("notification", "t", 0);
    notification.notify(json!(1)).unwrap();
    notification.mark_sent("transport-a", 0);
    run(notification.acknowledge(1));
    let offline = Message::new("offline", "t", 0);
    offline.only_if_connected().send(json!(1)).unwrap();
    let offline_sent = sent("offline-sent", "t", 0);
    offline_sent.only_if_connected();
    let finalized = sent("finalized", "t", 0);
    run(finalized.complete_timed_out());

    for message in [&cancelled, &notification, &offline, &offline_sent, &finalized] {
        buffer.enqueue(message.clone());
    }

    assert_eq!(buffer.remove_cancelled(), 1);
    assert_eq!(buffer.remove_acknowledged_notifications(), 1);
    assert_eq!(buffer.remove_offline_unsent(), 1);
    assert_eq!(buffer.remove_finalized(), 1);

    assert_eq!(buffer.len(), 1);
    assert!(buffer.get("offline-sent").is_some());
}
