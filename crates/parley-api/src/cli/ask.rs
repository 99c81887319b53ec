//! One-shot chat turn from the command line.
//!
//! Streams the reply to stdout as it is generated. Ctrl+C cancels the turn
//! without recording the partial reply.

use std::io::Write;

use anyhow::Result;
use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parley_core::chat::completion::CompletionError;
use parley_types::chat::ChatCompletionInput;

use crate::state::AppState;

/// Send `message` as `user` and print the streamed reply.
///
/// # Examples
///
/// ```bash
/// parley ask --user alice "What is a token budget?"
/// parley ask --user alice --chat-id 0191... "And how is it enforced?"
/// ```
pub async fn ask(
    state: &AppState,
    chat_id: Option<Uuid>,
    user: String,
    message: String,
    json: bool,
) -> Result<()> {
    let service = state.completion()?;

    let input = ChatCompletionInput {
        chat_id,
        user_id: user,
        user_message: message,
        config: Some(state.config.defaults.clone()),
    };

    let (tx, mut rx) = mpsc::channel(state.config.stream.effective_capacity());
    let cancel = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    // `tx` moves into the turn so the printer sees the channel close when it ends.
    let turn = async move { service.execute(input, &tx, &cancel).await };

    let printer = async move {
        let mut stdout = std::io::stdout();
        let mut printed = 0;
        while let Some(record) = rx.recv().await {
            if !json {
                let delta = record.content.get(printed..).unwrap_or_default();
                write!(stdout, "{delta}")?;
                stdout.flush()?;
            }
            printed = record.content.len();
        }
        Ok::<_, std::io::Error>(())
    };

    let (result, printed) = tokio::join!(turn, printer);
    interrupt.abort();
    printed?;

    match result {
        Ok(output) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!();
                println!();
                println!(
                    "  {} {}",
                    style("chat").dim(),
                    style(output.chat_id).cyan()
                );
            }
            Ok(())
        }
        Err(CompletionError::Persistence { output, source }) => {
            println!();
            eprintln!(
                "  {} Reply for {} was not saved: {source}",
                style("!").red().bold(),
                style(output.chat_id).cyan()
            );
            Err(anyhow::anyhow!("failed to persist conversation {}", output.chat_id))
        }
        Err(e) => {
            println!();
            Err(anyhow::anyhow!("chat turn failed during {}: {e}", e.phase()))
        }
    }
}
