//! Token counting for budget accounting.
//!
//! The conversation window only needs a pure `(model, text) -> tokens`
//! function. Exact counting would require a model-specific tokenizer; the
//! bundled [`HeuristicTokenCounter`] uses the usual ~4 characters per token
//! estimate, which is good enough for keeping requests under a ceiling.

/// Pure token counting capability.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` occupies for `model`.
    fn count(&self, model: &str, text: &str) -> u32;
}

/// Per-message framing overhead (role markers, separators).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Character-based token estimate: `ceil(chars / 4)` plus framing overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, _model: &str, text: &str) -> u32 {
        let chars = text.chars().count() as u64;
        let estimate = chars.div_ceil(4) + u64::from(MESSAGE_OVERHEAD_TOKENS);
        u32::try_from(estimate).unwrap_or(u32::MAX)
    }
}
