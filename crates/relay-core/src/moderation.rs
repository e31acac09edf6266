use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OnceCell};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked { reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

#[async_trait]
pub trait ModerationClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Verdict;
}

/// Flags text containing any blocklisted word (case-insensitive, whole words).
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    blocklist: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(blocklist: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocklist: blocklist
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl ModerationClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Verdict {
        let lowered = text.to_lowercase();
        let hit = lowered
            .split(|c: char| !c.is_alphanumeric())
            .find(|word| self.blocklist.iter().any(|blocked| blocked == word));
        match hit {
            Some(_) => Verdict::Blocked {
                reason: "the self-hosted moderation model detected unsuitable content".to_string(),
            },
            None => Verdict::Allowed,
        }
    }
}

struct Memo {
    cells: HashMap<String, Arc<OnceCell<Verdict>>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Memo {
    fn cell(&mut self, text: &str) -> Arc<OnceCell<Verdict>> {
        if let Some(cell) = self.cells.get(text) {
            return cell.clone();
        }
        while self.capacity > 0 && self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    self.cells.remove(&evicted);
                }
                None => break,
            }
        }
        let cell = Arc::new(OnceCell::new());
        self.cells.insert(text.to_string(), cell.clone());
        self.order.push_back(text.to_string());
        cell
    }
}

/// Memoized moderation check. Each distinct text is classified at most once
/// while it stays in the memo, even under concurrent lookups.
pub struct ModerationGate {
    classifier: Arc<dyn ModerationClassifier>,
    memo: Mutex<Memo>,
}

impl ModerationGate {
    pub fn new(classifier: Arc<dyn ModerationClassifier>, capacity: usize) -> Self {
        Self {
            classifier,
            memo: Mutex::new(Memo {
                cells: HashMap::new(),
                order: VecDeque::new(),
                capacity,
            }),
        }
    }

    /// Checks the text content of a request payload.
    pub async fn check_payload(&self, payload: &JsonValue) -> Verdict {
        match extract_text(payload) {
            Some(text) => self.check_text(&text).await,
            None => Verdict::Allowed,
        }
    }

    pub async fn check_text(&self, text: &str) -> Verdict {
        if text.chars().count() <= 2 || text.chars().all(char::is_numeric) {
            return Verdict::Allowed;
        }
        let cell = self.memo.lock().await.cell(text);
        cell.get_or_init(|| self.classifier.classify(text))
            .await
            .clone()
    }
}

/// Reduces a payload to the single string that gets moderated.
///
/// `messages` wins over `input`/`prompt`; function descriptions are appended.
pub fn extract_text(payload: &JsonValue) -> Option<String> {
    let mut text = match payload.get("messages").and_then(JsonValue::as_array) {
        Some(messages) => messages
            .iter()
            .filter_map(message_content)
            .collect::<Vec<_>>()
            .join("\n"),
        None => payload
            .get("input")
            .or_else(|| payload.get("prompt"))
            .map(input_to_text)
            .unwrap_or_default(),
    };

    if let Some(functions) = payload.get("functions").and_then(JsonValue::as_array) {
        let descriptions: Vec<&str> = functions
            .iter()
            .filter_map(|f| f.get("description").and_then(JsonValue::as_str))
            .collect();
        if !descriptions.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&descriptions.join("\n"));
        }
    }

    (!text.is_empty()).then_some(text)
}

fn input_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) => Some(s.clone()),
                other => message_content(other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn message_content(message: &JsonValue) -> Option<String> {
    match message.get("content")? {
        JsonValue::String(s) => Some(s.clone()),
        // Multi-part content: keep the text parts.
        JsonValue::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(JsonValue::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}
