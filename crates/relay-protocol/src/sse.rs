use bytes::Bytes;

/// One logical upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// A complete SSE event (`data:` lines joined with `\n`).
    Sse { event: Option<String>, data: String },
    /// A bare JSON object/array written on its own line (NDJSON style).
    JsonLine(String),
}

impl RawEvent {
    pub fn data(&self) -> &str {
        match self {
            RawEvent::Sse { data, .. } => data,
            RawEvent::JsonLine(line) => line,
        }
    }
}

/// Incremental splitter for upstream stream bodies.
///
/// Accepts both SSE framing and newline-delimited JSON, since reverse-proxied
/// providers mix the two. Bytes are buffered until a full line is available, so
/// multi-byte UTF-8 sequences split across network chunks are reassembled.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<RawEvent> {
        self.push_slice(chunk.as_ref())
    }

    pub fn push_slice(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        // `pending` never holds a newline between calls, so only new bytes are scanned.
        let mut scan = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        let mut line_start = 0;
        while let Some(offset) = self.pending[scan..].iter().position(|b| *b == b'\n') {
            let end = scan + offset;
            let line = decode_line(&self.pending[line_start..end]);
            self.push_line(&line, &mut events);
            line_start = end + 1;
            scan = line_start;
        }
        self.pending.drain(..line_start);

        events
    }

    pub fn finish(&mut self) -> Vec<RawEvent> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            self.push_line(&decode_line(&raw), &mut events);
        }
        self.flush_event(&mut events);
        events
    }

    fn push_line(&mut self, line: &str, events: &mut Vec<RawEvent>) {
        if line.is_empty() {
            self.flush_event(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_lines.push(value.to_string());
            return;
        }
        if line == "data" {
            self.data_lines.push(String::new());
            return;
        }
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = (!value.is_empty()).then(|| value.to_string());
            return;
        }
        let trimmed = line.trim();
        if self.data_lines.is_empty() && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
            events.push(RawEvent::JsonLine(trimmed.to_string()));
        }
        // `id:` / `retry:` and anything unknown are ignored.
    }

    fn flush_event(&mut self, events: &mut Vec<RawEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        events.push(RawEvent::Sse {
            event: self.event.take(),
            data,
        });
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = String::from_utf8_lossy(raw);
    line.strip_suffix('\r').unwrap_or(&line).to_string()
}

/// Encode one SSE `data:` frame. Multi-line payloads get one `data:` per line.
pub fn encode_data(data: &str) -> Bytes {
    let mut out = String::with_capacity(data.len() + 8);
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}
