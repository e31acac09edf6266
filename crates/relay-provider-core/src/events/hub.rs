use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use super::types::Event;

pub trait EventSink: Send + Sync {
    /// Sinks only see events they accept.
    fn accepts(&self, _event: &Event) -> bool {
        true
    }

    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Fan-out for gateway events: a broadcast channel for in-process
/// subscribers plus registered sinks, each delivery on its own task so a
/// slow webhook never holds up a request.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
    sinks: Arc<RwLock<Arc<[Arc<dyn EventSink>]>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            sinks: Arc::new(RwLock::new(Arc::from(Vec::new()))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        let mut guard = self.sinks.write().await;
        let mut next = guard.to_vec();
        next.push(sink);
        *guard = Arc::from(next);
    }

    pub async fn emit(&self, event: Event) {
        let sinks = self.sinks.read().await.clone();
        for sink in sinks.iter().filter(|sink| sink.accepts(&event)) {
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move { sink.write(&event).await });
        }
        // No subscribers is the normal case outside tests.
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::events::{NoProviderAvailableEvent, OperationalEvent, UpstreamAttemptEvent};

    struct OperationalOnly(Arc<Mutex<Vec<String>>>);

    impl EventSink for OperationalOnly {
        fn accepts(&self, event: &Event) -> bool {
            matches!(event, Event::Operational(_))
        }

        fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                if let Event::Operational(op) = event {
                    self.0.lock().unwrap().push(op.message());
                }
            })
        }
    }

    fn attempt() -> Event {
        Event::Upstream(UpstreamAttemptEvent {
            request_id: "r1".to_string(),
            at: SystemTime::UNIX_EPOCH,
            provider: "alpha".to_string(),
            attempt_no: 1,
            method: "POST".to_string(),
            url: "https://alpha.example/v1/chat/completions".to_string(),
            status: Some(200),
            outcome: "ok".to_string(),
            credential_excerpt: None,
            transport_kind: None,
            error_message: None,
        })
    }

    #[tokio::test]
    async fn sinks_receive_only_accepted_events() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.add_sink(Arc::new(OperationalOnly(seen.clone()))).await;

        hub.emit(attempt()).await;
        hub.emit(Event::Operational(OperationalEvent::NoProviderAvailable(
            NoProviderAvailableEvent {
                at: SystemTime::UNIX_EPOCH,
                model: None,
                path: "/v1/images/generations".to_string(),
            },
        )))
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(matches!(rx.try_recv(), Ok(Event::Upstream(_))));
        assert!(matches!(rx.try_recv(), Ok(Event::Operational(_))));
    }
}
