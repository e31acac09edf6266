use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use super::{Event, EventSink};

/// Writes each event as one JSON line on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalEventSink;

impl TerminalEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TerminalEventSink {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let line = serde_json::to_string(event).unwrap_or_else(|err| {
                format!("{{\"event\":\"event_serialize_error\",\"error\":{:?}}}", err.to_string())
            });
            let _ = writeln!(std::io::stderr().lock(), "{line}");
        })
    }
}
