//! Minimal Server-Sent Events framing.
//!
//! Used to read `text/event-stream` replies from streamable-HTTP MCP servers,
//! which may answer a JSON-RPC POST with a single SSE event instead of a JSON
//! body.

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Remove and return the next complete event (without its blank-line delimiter).
pub fn drain_next_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Join the `data:` lines of one event. `None` if the event has no data.
#[must_use]
pub fn extract_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }

    data
}

/// Every `data` payload in a fully buffered event-stream body, in order.
///
/// A trailing event without a closing blank line is still returned.
#[must_use]
pub fn data_payloads(body: &str) -> Vec<String> {
    let mut buffer = body.as_bytes().to_vec();
    let mut out = Vec::new();
    while let Some(event) = drain_next_event(&mut buffer) {
        if let Some(data) = extract_data(&String::from_utf8_lossy(&event)) {
            out.push(data);
        }
    }
    if !buffer.is_empty()
        && let Some(data) = extract_data(&String::from_utf8_lossy(&buffer))
    {
        out.push(data);
    }
    out
}
