//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! Maps `async-openai`'s [`ChatCompletionResponseStream`] events to the
//! provider-agnostic [`StreamEvent`] enum defined in `parley-types`.

use futures_util::StreamExt;

use async_openai::types::chat::{ChatCompletionResponseStream, FinishReason};

use parley_core::llm::provider::EventStream;
use parley_types::llm::{LlmError, StopReason, StreamEvent, Usage};

/// Map an async-openai [`ChatCompletionResponseStream`] to a stream of [`StreamEvent`]s.
///
/// The returned stream emits events in this order:
/// 1. `Connected` -- immediately on entry
/// 2. `TextDelta` -- for each non-empty content chunk of the first choice
/// 3. `MessageDelta` -- with the stop reason when finish_reason appears
/// 4. `Usage` -- token usage (requires `stream_options.include_usage = true` on request)
/// 5. `Done` -- at the end of the stream
///
/// A transport error ends the stream with that error and no `Done`.
pub fn map_openai_stream(stream: ChatCompletionResponseStream) -> EventStream {
    Box::pin(async_stream::try_stream! {
        yield StreamEvent::Connected;

        let mut stream = stream;

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(|e| LlmError::Stream(e.to_string()))?;

            // The final chunk carries usage with an empty choices array.
            if let Some(usage) = chunk.usage.as_ref() {
                yield StreamEvent::Usage(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                });
            }

            // Only one candidate is ever requested.
            let Some(choice) = chunk.choices.into_iter().find(|c| c.index == 0) else {
                continue;
            };

            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    yield StreamEvent::TextDelta { text };
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                yield StreamEvent::MessageDelta {
                    stop_reason: map_finish_reason(finish_reason),
                };
            }
        }

        yield StreamEvent::Done;
    })
}

pub(crate) fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ContentFilter => StopReason::ContentFilter,
        FinishReason::ToolCalls | FinishReason::FunctionCall => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_to_stop_reason_mapping() {
        let cases = vec![
            (FinishReason::Stop, StopReason::EndTurn),
            (FinishReason::Length, StopReason::MaxTokens),
            (FinishReason::ContentFilter, StopReason::ContentFilter),
            (FinishReason::ToolCalls, StopReason::EndTurn),
        ];

        for (finish, expected) in cases {
            assert_eq!(map_finish_reason(finish), expected);
        }
    }
}
