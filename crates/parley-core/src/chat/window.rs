//! Token-budgeted sliding window over a conversation's messages.
//!
//! The window holds a pinned system message plus an ordered list of
//! evictable messages. Admitting a message evicts the oldest evictable
//! entries (FIFO) until the new message fits under the model ceiling.
//! Evicted messages move to the erased list; nothing is ever dropped.
//!
//! The pinned system message is never an eviction candidate. When every
//! evictable message is gone and the incoming message still does not fit,
//! it is admitted anyway rather than rejected.

use std::collections::VecDeque;

use parley_types::chat::{ChatMessage, MessageRole, ModelProfile};

use crate::llm::token_counter::TokenCounter;

/// Build a message whose token count is computed once, here, for `profile`.
pub fn new_message<C: TokenCounter + ?Sized>(
    counter: &C,
    profile: &ModelProfile,
    role: MessageRole,
    content: impl Into<String>,
) -> ChatMessage {
    let content = content.into();
    let tokens = counter.count(&profile.name, &content);
    ChatMessage::new(role, content, tokens)
}

/// Ordered active/erased message lists with a fixed token ceiling.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    max_tokens: u32,
    pinned: ChatMessage,
    active: VecDeque<ChatMessage>,
    erased: Vec<ChatMessage>,
    usage: u32,
}

impl ConversationWindow {
    /// Create an empty window around the pinned system message.
    pub fn new(max_tokens: u32, pinned: ChatMessage) -> Self {
        Self::from_parts(max_tokens, pinned, Vec::new(), Vec::new())
    }

    /// Rebuild a window from stored lists. Usage is recomputed, never trusted.
    pub fn from_parts(
        max_tokens: u32,
        pinned: ChatMessage,
        active: Vec<ChatMessage>,
        erased: Vec<ChatMessage>,
    ) -> Self {
        let mut window = Self {
            max_tokens,
            pinned,
            active: active.into(),
            erased,
            usage: 0,
        };
        window.recompute_usage();
        window
    }

    /// Admit `message` at the tail, evicting the oldest messages as needed.
    ///
    /// Returns how many messages were evicted.
    pub fn admit(&mut self, message: ChatMessage) -> usize {
        let incoming = u64::from(message.token_count());
        let mut evicted = 0;

        while u64::from(self.max_tokens) < incoming + u64::from(self.usage) {
            let Some(oldest) = self.active.pop_front() else {
                break;
            };
            self.erased.push(oldest);
            evicted += 1;
            self.recompute_usage();
        }

        self.active.push_back(message);
        self.recompute_usage();
        evicted
    }

    /// Active messages in conversation order, pinned system message first.
    ///
    /// Each call starts a fresh pass over the same snapshot.
    pub fn active_messages(&self) -> impl Iterator<Item = &ChatMessage> + Clone + '_ {
        std::iter::once(&self.pinned).chain(self.active.iter())
    }

    /// Number of active messages, including the pinned system message.
    pub fn active_count(&self) -> usize {
        self.active.len() + 1
    }

    /// The pinned system message.
    pub fn pinned(&self) -> &ChatMessage {
        &self.pinned
    }

    /// Active messages that are eligible for eviction, oldest first.
    pub fn evictable(&self) -> impl Iterator<Item = &ChatMessage> + '_ {
        self.active.iter()
    }

    /// Messages evicted so far, in eviction order.
    pub fn erased_messages(&self) -> &[ChatMessage] {
        &self.erased
    }

    /// Sum of active token counts, pinned message included.
    pub fn token_usage(&self) -> u32 {
        self.usage
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn recompute_usage(&mut self) {
        self.usage = self
            .active_messages()
            .fold(0u32, |acc, m| acc.saturating_add(m.token_count()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: MessageRole, content: &str, tokens: u32) -> ChatMessage {
        ChatMessage::new(role, content, tokens)
    }

    fn window(max: u32) -> ConversationWindow {
        ConversationWindow::new(max, msg(MessageRole::System, "sys", 10))
    }

    fn contents<'a>(iter: impl Iterator<Item = &'a ChatMessage>) -> Vec<&'a str> {
        iter.map(|m| m.content()).collect()
    }

    #[test]
    fn test_admit_within_budget_keeps_everything() {
        let mut w = window(100);
        assert_eq!(w.admit(msg(MessageRole::User, "a", 20)), 0);
        assert_eq!(w.admit(msg(MessageRole::Assistant, "b", 30)), 0);

        assert_eq!(w.active_count(), 3);
        assert_eq!(w.token_usage(), 60);
        assert!(w.erased_messages().is_empty());
    }

    #[test]
    fn test_exact_fit_does_not_evict() {
        let mut w = window(50);
        w.admit(msg(MessageRole::User, "a", 20));
        assert_eq!(w.admit(msg(MessageRole::Assistant, "b", 20)), 0);
        assert_eq!(w.token_usage(), 50);
    }

    #[test]
    fn test_fifo_eviction_order() {
        let mut w = window(100);
        w.admit(msg(MessageRole::User, "m1", 30));
        w.admit(msg(MessageRole::Assistant, "m2", 30));
        w.admit(msg(MessageRole::User, "m3", 30));
        assert_eq!(w.token_usage(), 100);

        // 10 + 30 + 45 = 85 only after m1 and m2 are gone
        let evicted = w.admit(msg(MessageRole::Assistant, "new", 45));

        assert_eq!(evicted, 2);
        assert_eq!(contents(w.erased_messages().iter()), vec!["m1", "m2"]);
        assert_eq!(contents(w.evictable()), vec!["m3", "new"]);
        assert_eq!(contents(w.active_messages()), vec!["sys", "m3", "new"]);
        assert_eq!(w.token_usage(), 85);
    }

    #[test]
    fn test_oversized_message_admitted_when_nothing_left_to_evict() {
        let mut w = window(100);
        w.admit(msg(MessageRole::User, "small", 20));

        let evicted = w.admit(msg(MessageRole::Assistant, "huge", 500));

        assert_eq!(evicted, 1);
        assert_eq!(contents(w.evictable()), vec!["huge"]);
        assert_eq!(w.token_usage(), 510);
        assert_eq!(contents(w.erased_messages().iter()), vec!["small"]);
    }

    #[test]
    fn test_oversized_message_on_empty_window() {
        let mut w = window(100);
        assert_eq!(w.admit(msg(MessageRole::User, "huge", 1_000)), 0);
        assert_eq!(w.active_count(), 2);
    }

    #[test]
    fn test_pinned_message_never_evicted() {
        let mut w = window(40);
        for i in 0..10 {
            w.admit(msg(MessageRole::User, &format!("m{i}"), 25));
            assert_eq!(w.pinned().content(), "sys");
            assert_eq!(w.active_messages().next().map(|m| m.content()), Some("sys"));
        }
        assert_eq!(w.erased_messages().len(), 9);
        assert!(w.erased_messages().iter().all(|m| m.role() != MessageRole::System));
    }

    #[test]
    fn test_budget_invariant_holds_after_every_admit() {
        let sizes = [5, 40, 12, 90, 1, 33, 150, 7, 60, 60, 2];
        let mut w = window(120);
        for (i, size) in sizes.iter().enumerate() {
            w.admit(msg(MessageRole::User, &format!("m{i}"), *size));
            let within_budget = w.token_usage() <= w.max_tokens();
            let only_newest = w.evictable().count() == 1;
            assert!(within_budget || only_newest, "budget broken after m{i}");
        }
    }

    #[test]
    fn test_usage_matches_recount_after_evictions() {
        let sizes = [25, 50, 75, 10, 10, 200, 30];
        let mut w = window(150);
        for (i, size) in sizes.iter().enumerate() {
            w.admit(msg(MessageRole::User, &format!("m{i}"), *size));
            let recount: u32 = w.active_messages().map(|m| m.token_count()).sum();
            assert_eq!(recount, w.token_usage());
        }
    }

    #[test]
    fn test_active_messages_is_restartable() {
        let mut w = window(100);
        w.admit(msg(MessageRole::User, "a", 5));
        let first: Vec<_> = contents(w.active_messages());
        let second: Vec<_> = contents(w.active_messages());
        assert_eq!(first, second);
    }

    #[test]
    fn test_from_parts_recomputes_usage() {
        let w = ConversationWindow::from_parts(
            100,
            msg(MessageRole::System, "sys", 10),
            vec![msg(MessageRole::User, "a", 15)],
            vec![msg(MessageRole::User, "old", 70)],
        );
        assert_eq!(w.token_usage(), 25);
        assert_eq!(w.erased_messages().len(), 1);
    }

    #[test]
    fn test_new_message_counts_once() {
        struct Fixed;
        impl TokenCounter for Fixed {
            fn count(&self, model: &str, text: &str) -> u32 {
                assert_eq!(model, "gpt-4o");
                text.len() as u32
            }
        }

        let profile = ModelProfile::new("gpt-4o", 1_000);
        let m = new_message(&Fixed, &profile, MessageRole::User, "hello");
        assert_eq!(m.token_count(), 5);
        assert_eq!(m.role(), MessageRole::User);
    }
}
