//! Conversation inspection CLI commands: show, end.

use anyhow::{Context, Result};
use console::style;
use uuid::Uuid;

use parley_core::chat::conversation::Conversation;
use parley_types::chat::{ChatMessage, ConversationStatus};

use crate::state::AppState;

/// Show a conversation: configuration, budget usage, and history.
///
/// # Examples
///
/// ```bash
/// parley show 0191c0a4-...
/// parley show 0191c0a4-... --json
/// ```
pub async fn show(state: &AppState, chat_id: Uuid, json: bool) -> Result<()> {
    let conversation = state
        .conversation_service
        .get_conversation(&chat_id)
        .await?
        .with_context(|| format!("Conversation {chat_id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversation.snapshot())?);
        return Ok(());
    }

    print_details(&conversation);

    let erased = conversation.erased_messages();
    if !erased.is_empty() {
        println!("  {}", style("── Erased ──").dim());
        for message in erased {
            print_message(message, true);
        }
        println!();
    }

    println!("  {}", style("── Active ──").dim());
    for message in conversation.active_messages() {
        print_message(message, false);
    }
    println!();

    Ok(())
}

/// End a conversation. Ending an already ended conversation succeeds.
pub async fn end(state: &AppState, chat_id: Uuid, json: bool) -> Result<()> {
    let conversation = state
        .conversation_service
        .end_conversation(&chat_id)
        .await
        .with_context(|| format!("Failed to end conversation {chat_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversation.snapshot())?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Conversation {} ended",
        style("✓").green().bold(),
        style(chat_id).cyan()
    );
    println!();
    Ok(())
}

fn print_details(conversation: &Conversation) {
    let config = conversation.config();

    println!();
    println!("  {}", style(conversation.id()).cyan().bold());
    println!();
    println!("  {}", style("── Details ──").dim());
    println!("  {}     {}", style("User:").bold(), conversation.user_id());
    println!(
        "  {}   {}",
        style("Status:").bold(),
        format_status(conversation.status())
    );
    println!("  {}    {}", style("Model:").bold(), config.model.name);
    println!(
        "  {}   {} / {} tokens",
        style("Budget:").bold(),
        conversation.token_usage(),
        config.model.max_tokens
    );
    println!(
        "  {} {}",
        style("Messages:").bold(),
        format!(
            "{} active, {} erased",
            conversation.active_count(),
            conversation.erased_messages().len()
        )
    );
    println!(
        "  {}  {}",
        style("Updated:").bold(),
        conversation.updated_at().format("%Y-%m-%d %H:%M")
    );
    println!();
}

fn format_status(status: ConversationStatus) -> String {
    match status {
        ConversationStatus::Active => format!("{}", style("active").green()),
        ConversationStatus::Ended => format!("{}", style("ended").dim()),
    }
}

fn print_message(message: &ChatMessage, erased: bool) {
    let role = format!("{:>9}", message.role().to_string());
    let role = if erased {
        style(role).dim()
    } else {
        style(role).bold()
    };
    println!(
        "  {} {} {}",
        role,
        style(format!("({})", message.token_count())).dim(),
        message.content()
    );
}
