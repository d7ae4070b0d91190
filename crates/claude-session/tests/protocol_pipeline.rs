//! The byte-to-message pipeline: LineFramer feeding the decoder must
//! deliver exactly the frames that were written, in order, regardless of
//! how the bytes were chunked.

use claude_session::decode::{decode_line, decode_stream};
use claude_session::framer::LineFramer;
use claude_session::message::Message;

const DOC: &str = concat!(
    r#"{"type":"system","subtype":"init","session_id":"S","cwd":"/","model":"m","permission_mode":"default","tools":[],"mcp_servers":[]}"#,
    "\n",
    r#"{"type":"assistant","session_id":"S","message":{"id":"m1","model":"m","content":[{"type":"text","text":"héllo wörld"}]}}"#,
    "\n",
    r#"{"type":"system","subtype":"compact_boundary","session_id":"S2","compact_metadata":{"trigger":"auto","pre_tokens":9000}}"#,
    "\n",
    r#"{"type":"stream_event","session_id":"S2","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"…"}}}"#,
    "\n",
    r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":3,"duration_api_ms":2,"num_turns":1,"result":"héllo wörld","total_cost_usd":0.0,"session_id":"S2"}"#,
    "\n",
);

fn frame_and_decode(chunk_size: usize) -> Vec<Message> {
    let mut framer = LineFramer::new();
    let mut messages = Vec::new();
    for chunk in DOC.as_bytes().chunks(chunk_size) {
        for line in framer.feed(chunk).unwrap() {
            messages.push(decode_line(&line).unwrap());
        }
    }
    if let Some(line) = framer.finish().unwrap() {
        messages.push(decode_line(&line).unwrap());
    }
    messages
}

#[test]
fn chunking_never_drops_reorders_or_duplicates() {
    let whole = decode_stream(DOC).unwrap();
    assert_eq!(whole.len(), 5);

    // Chunk sizes chosen to split lines mid-frame and mid-UTF-8-sequence.
    for chunk_size in [1, 2, 3, 7, 16, 64, 4096] {
        let chunked = frame_and_decode(chunk_size);
        assert_eq!(
            chunked, whole,
            "chunk size {chunk_size} changed the decoded sequence"
        );
    }
}

#[test]
fn json_projection_survives_the_pipeline() {
    // Re-encode every decoded message and decode it again; the pipeline and
    // the projection must agree.
    for message in decode_stream(DOC).unwrap() {
        let line = message.to_json_line();
        assert_eq!(decode_line(&line).unwrap(), message);
    }
}

#[test]
fn missing_trailing_newline_still_yields_the_last_frame() {
    let trimmed = DOC.trim_end_matches('\n');
    let mut framer = LineFramer::new();
    let mut messages = Vec::new();
    for line in framer.feed(trimmed.as_bytes()).unwrap() {
        messages.push(decode_line(&line).unwrap());
    }
    if let Some(line) = framer.finish().unwrap() {
        messages.push(decode_line(&line).unwrap());
    }
    assert_eq!(messages.len(), 5);
    assert!(matches!(messages.last(), Some(Message::Result(_))));
}
