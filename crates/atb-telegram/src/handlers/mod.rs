//! Telegram update handlers.
//!
//! Every text update is handled under its chat's lock so one seller's
//! messages are processed in arrival order. Commands go to `commands`; other
//! text is fed to the acquisition machine.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::error;

use atb_core::domain::{ChatId, UserId};

use crate::router::AppState;

mod commands;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(()); // channel posts and the like
    };
    let chat_id = msg.chat.id.0;
    let user_id = user.id.0 as i64;
    let username = user.username.clone();

    let Some(text) = msg.text() else {
        let _ = bot
            .send_message(msg.chat.id, "Send a phone number as text to begin.")
            .await;
        return Ok(());
    };

    // Commands and free text share the lock so one chat's messages are
    // handled strictly in arrival order (a /cancel must not race an earlier
    // submission).
    let _guard = state.chat_locks.lock_chat(chat_id).await;

    if text.starts_with('/') {
        return commands::handle_command(msg.clone(), state, text).await;
    }

    if let Err(e) = state
        .machine
        .on_text(ChatId(chat_id), UserId(user_id), username.as_deref(), text)
        .await
    {
        error!("text handler failed for chat {chat_id}: {e}");
    }
    Ok(())
}
