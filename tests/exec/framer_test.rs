//! Tests for line framing and lenient decoding.

use codex_bridge::exec::{parse_line, Event, EventDecoder, EventMsg, LineFramer, StreamError};
use serde_json::{json, Value};

#[test]
fn record_split_across_chunks() {
    let mut decoder = EventDecoder::<Value>::new();
    let mut records = decoder.decode("{\"a\":1}\n{\"");
    records.extend(decoder.decode("b\":2}\n"));
    assert_eq!(records, vec![json!({"a": 1}), json!({"b": 2})]);
}

#[test]
fn trailing_line_without_newline_is_flushed() {
    let mut decoder = EventDecoder::<Value>::new();
    assert!(decoder.decode(r#"{"a":1}"#).is_empty());
    assert_eq!(decoder.flush(), Some(json!({"a": 1})));
    assert_eq!(decoder.flush(), None);
}

#[test]
fn malformed_line_amid_valid_ones() {
    let mut decoder = EventDecoder::<Value>::new();
    let records = decoder.decode("{\"a\":1}\nNOT-JSON\n{\"b\":2}\n");
    assert_eq!(records, vec![json!({"a": 1}), json!({"b": 2})]);
    assert_eq!(decoder.dropped(), 1);
}

#[test]
fn byte_at_a_time_feeding() {
    let input = "{\"id\":\"1\",\"msg\":{\"type\":\"agent_message\",\"message\":\"hé\"}}\n";
    let mut decoder = EventDecoder::<Event>::new();
    let mut events = Vec::new();
    for byte in input.as_bytes() {
        events.extend(decoder.decode([*byte]));
    }
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].typed().unwrap(),
        EventMsg::AgentMessage {
            message: "hé".to_string()
        }
    );
}

#[test]
fn framer_yields_empty_segments() {
    let mut framer = LineFramer::new();
    assert_eq!(framer.feed("\n\n"), vec!["", ""]);
}

#[test]
fn parse_line_reports_input() {
    match parse_line::<Event>("{\"id\":") {
        Err(StreamError::ParseError { input, reason }) => {
            assert_eq!(input, "{\"id\":");
            assert!(!reason.is_empty());
        }
        Ok(event) => panic!("Expected ParseError, got {event:?}"),
    }
}
