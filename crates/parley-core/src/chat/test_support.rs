//! In-memory doubles shared by the chat unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::{StreamExt, stream};
use uuid::Uuid;

use parley_types::chat::{ConversationSnapshot, ConversationSummary};
use parley_types::error::RepositoryError;
use parley_types::llm::{CompletionRequest, LlmError, StreamEvent};

use crate::llm::provider::{EventStream, LlmProvider};
use crate::llm::token_counter::TokenCounter;

use super::conversation::Conversation;
use super::repository::ConversationRepository;

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// One token per byte keeps budgets easy to reason about.
pub struct ByteCounter;

impl TokenCounter for ByteCounter {
    fn count(&self, _model: &str, text: &str) -> u32 {
        text.len() as u32
    }
}

/// Versioned snapshot store that records every call in a shared log.
pub struct MockRepository {
    state: Mutex<HashMap<Uuid, ConversationSnapshot>>,
    log: CallLog,
    fail_find: bool,
    fail_save: bool,
}

impl MockRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            fail_find: false,
            fail_save: false,
        }
    }

    pub fn failing_find(mut self) -> Self {
        self.fail_find = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Seed a snapshot without touching the call log.
    pub fn insert(&self, snapshot: ConversationSnapshot) {
        self.state.lock().unwrap().insert(snapshot.id, snapshot);
    }

    pub fn stored(&self, id: &Uuid) -> Option<ConversationSnapshot> {
        self.state.lock().unwrap().get(id).cloned()
    }

    fn record(&self, call: &'static str) {
        self.log.lock().unwrap().push(call);
    }
}

impl ConversationRepository for MockRepository {
    async fn find(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        self.record("find");
        if self.fail_find {
            return Err(RepositoryError::Connection);
        }
        self.stored(id)
            .map(Conversation::restore)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        self.record("create");
        let mut state = self.state.lock().unwrap();
        if state.contains_key(&conversation.id()) {
            return Err(RepositoryError::Conflict(conversation.id().to_string()));
        }
        state.insert(conversation.id(), conversation.snapshot());
        Ok(())
    }

    async fn save(&self, conversation: &Conversation) -> Result<u64, RepositoryError> {
        self.record("save");
        if self.fail_save {
            return Err(RepositoryError::Query("disk full".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let stored = state
            .get(&conversation.id())
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != conversation.version() {
            return Err(RepositoryError::Conflict(format!(
                "stored version {} != {}",
                stored.version,
                conversation.version()
            )));
        }
        let mut snapshot = conversation.snapshot();
        snapshot.version += 1;
        let version = snapshot.version;
        state.insert(snapshot.id, snapshot);
        Ok(version)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        self.record("list");
        let state = self.state.lock().unwrap();
        let mut summaries: Vec<_> = state
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| ConversationSummary {
                id: s.id,
                user_id: s.user_id.clone(),
                status: s.status,
                model: s.config.model.name.clone(),
                token_usage: s.token_usage,
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = limit {
            summaries.truncate(limit.max(0) as usize);
        }
        Ok(summaries)
    }
}

/// Scripted stream item.
pub enum MockItem {
    Text(&'static str),
    Fail(&'static str),
}

/// Provider that replays a script and remembers the last request.
pub struct MockProvider {
    items: Vec<&'static str>,
    fail: Option<&'static str>,
    hang: bool,
    log: Option<CallLog>,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(items: Vec<MockItem>) -> Self {
        let mut texts = Vec::new();
        let mut fail = None;
        for item in items {
            match item {
                MockItem::Text(text) => texts.push(text),
                MockItem::Fail(message) => {
                    fail = Some(message);
                    break;
                }
            }
        }
        Self {
            items: texts,
            fail,
            hang: false,
            log: None,
            last_request: Mutex::new(None),
        }
    }

    pub fn with_log(items: Vec<MockItem>, log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new(items)
        }
    }

    /// Never finish after the scripted items.
    pub fn pending(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        if let Some(log) = &self.log {
            log.lock().unwrap().push("stream");
        }
        *self.last_request.lock().unwrap() = Some(request);

        let mut events: Vec<Result<StreamEvent, LlmError>> = vec![Ok(StreamEvent::Connected)];
        events.extend(self.items.iter().map(|text| {
            Ok(StreamEvent::TextDelta {
                text: text.to_string(),
            })
        }));

        if let Some(message) = self.fail {
            events.push(Err(LlmError::Stream(message.to_string())));
            return Box::pin(stream::iter(events));
        }
        if self.hang {
            return Box::pin(stream::iter(events).chain(stream::pending()));
        }
        events.push(Ok(StreamEvent::Done));
        Box::pin(stream::iter(events))
    }
}
