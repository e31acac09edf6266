use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;
use wreq::Client;

use relay_provider_core::{Event, EventSink};

/// Posts operational events to a chat webhook as `{"content": "..."}`.
pub struct WebhookEventSink {
    client: Client,
    url: String,
}

impl WebhookEventSink {
    pub fn new(url: impl Into<String>) -> Result<Self, wreq::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl EventSink for WebhookEventSink {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Operational(_))
    }

    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Event::Operational(op) = event else {
                return;
            };
            let body = json!({ "content": format!("Relay issue: {}", op.message()) });
            let result = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.to_string())
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    tracing::warn!(
                        event = "webhook_rejected",
                        status = resp.status().as_u16(),
                    );
                }
                Err(err) => {
                    tracing::warn!(event = "webhook_failed", error = %err);
                }
            }
        })
    }
}
