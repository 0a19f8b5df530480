use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::{error, warn};

use atb_core::{
    domain::{AccountStatus, ChatId, UserId},
    store::AccountRow,
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn status_emoji(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Pending => "\u{23f3}",
        AccountStatus::Accepted => "\u{2705}",
        AccountStatus::Verified => "\u{1f510}",
        AccountStatus::Paid => "\u{1f4b0}",
        AccountStatus::Rejected => "\u{274c}",
    }
}

fn format_account_list(rows: &[AccountRow], ready: i64) -> String {
    if rows.is_empty() {
        return "No accounts submitted yet.".to_string();
    }
    let mut out = String::from("Submitted accounts:\n\n");
    for row in rows {
        out.push_str(&format!(
            "{} {} | {}\n",
            status_emoji(row.status),
            row.phone_number,
            row.status.as_str()
        ));
    }
    out.push_str(&format!("\nReady for payment: {ready}"));
    out
}

pub async fn handle_command(msg: Message, state: Arc<AppState>, text: &str) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let chat = ChatId(msg.chat.id.0);
    let user_id = user.id.0 as i64;
    let (cmd, args) = parse_command(text);

    let result = match cmd.as_str() {
        "start" => state.machine.start(chat, UserId(user_id)).await,
        "cancel" => state.machine.cancel(chat, UserId(user_id)).await,
        "withdraw" => state.machine.begin_withdrawal(chat, UserId(user_id)).await,
        "myaccounts" => my_accounts(&state, chat, user_id).await,
        _ if user_id == state.cfg.admin_id => {
            return admin_command(msg.clone(), state, &cmd, &args).await
        }
        _ => {
            say(
                &state,
                chat,
                "Unknown command. Send a phone number to submit an account, or \
                 /withdraw to request payment.",
            )
            .await;
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("command /{cmd} failed for user {user_id}: {e}");
        say(&state, chat, "Something went wrong. Please try again.").await;
    }
    Ok(())
}

async fn my_accounts(state: &AppState, chat: ChatId, user_id: i64) -> atb_core::Result<()> {
    let rows = state.store.accounts_for_user(user_id)?;
    let ready = state.store.ready_count(user_id)?;
    say(state, chat, &format_account_list(&rows, ready)).await;
    Ok(())
}

async fn admin_command(
    msg: Message,
    state: Arc<AppState>,
    cmd: &str,
    args: &str,
) -> ResponseResult<()> {
    let chat = ChatId(msg.chat.id.0);

    let result = match cmd {
        "user_accounts" => user_accounts(&state, chat, args).await,
        "mark_paid" => mark_paid(&state, chat, args).await,
        "accept" => review(&state, chat, args, AccountStatus::Verified).await,
        "reject" => review(&state, chat, args, AccountStatus::Rejected).await,
        "stats" => stats(&state, chat).await,
        "sessions" => sessions(&state, chat).await,
        "completed_today_payment" => payday_notice(&state, chat).await,
        _ => {
            say(&state, chat, &format!("Unknown admin command: /{cmd}")).await;
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("admin command /{cmd} failed: {e}");
        say(&state, chat, &format!("Command failed: {e}")).await;
    }
    Ok(())
}

async fn user_accounts(state: &AppState, chat: ChatId, args: &str) -> atb_core::Result<()> {
    let Ok(target) = args.trim().parse::<i64>() else {
        say(state, chat, "Usage: /user_accounts <user_id>").await;
        return Ok(());
    };
    let rows = state.store.accounts_for_user(target)?;
    let ready = state.store.ready_count(target)?;
    let body = format!("User {target}\n\n{}", format_account_list(&rows, ready));
    say(state, chat, &body).await;
    Ok(())
}

async fn mark_paid(state: &AppState, chat: ChatId, args: &str) -> atb_core::Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(Ok(target)), Some(Ok(count))) = (
        parts.next().map(str::parse::<i64>),
        parts.next().map(str::parse::<i64>),
    ) else {
        say(state, chat, "Usage: /mark_paid <user_id> <count>").await;
        return Ok(());
    };
    if count <= 0 {
        say(state, chat, "Count must be positive.").await;
        return Ok(());
    }

    if !state.store.mark_accounts_paid(target, count)? {
        let ready = state.store.ready_count(target)?;
        let body = format!(
            "Refused: user {target} has only {ready} account(s) ready for payment."
        );
        say(state, chat, &body).await;
        return Ok(());
    }

    say(
        state,
        chat,
        &format!("Settled: {count} account(s) of user {target} marked paid."),
    )
    .await;

    // Receipt to the seller; the settlement stands even if this fails.
    let receipt = format!(
        "Payment for {count} account(s) has been sent. Thank you for your business."
    );
    if let Err(e) = state.messenger.send_text(ChatId(target), &receipt).await {
        warn!("could not notify user {target} of payment: {e}");
    }
    Ok(())
}

async fn review(
    state: &AppState,
    chat: ChatId,
    args: &str,
    status: AccountStatus,
) -> atb_core::Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(Ok(target)), Some(phone)) = (parts.next().map(str::parse::<i64>), parts.next())
    else {
        say(
            state,
            chat,
            &format!("Usage: /{} <user_id> <phone>", verb(status)),
        )
        .await;
        return Ok(());
    };

    let Some(row) = state.store.account_by_phone(phone)? else {
        say(state, chat, &format!("No account found for {phone}.")).await;
        return Ok(());
    };
    if row.user_id != target {
        let body = format!(
            "{phone} belongs to user {}, not {target}. Nothing changed.",
            row.user_id
        );
        say(state, chat, &body).await;
        return Ok(());
    }

    state.store.update_account_status(phone, status, None, None)?;
    say(
        state,
        chat,
        &format!("{} {phone} marked {}.", status_emoji(status), status.as_str()),
    )
    .await;

    let notice = match status {
        AccountStatus::Verified => {
            format!("Your account {phone} was verified and is ready for payment.")
        }
        _ => format!("Your account {phone} was rejected and will not be paid."),
    };
    if let Err(e) = state.messenger.send_text(ChatId(target), &notice).await {
        warn!("could not notify user {target} of review outcome: {e}");
    }
    Ok(())
}

fn verb(status: AccountStatus) -> &'static str {
    if status == AccountStatus::Verified {
        "accept"
    } else {
        "reject"
    }
}

async fn stats(state: &AppState, chat: ChatId) -> atb_core::Result<()> {
    let counts = state.store.status_counts()?;
    if counts.is_empty() {
        say(state, chat, "No accounts in the database.").await;
        return Ok(());
    }
    let mut out = String::from("Account totals:\n\n");
    let mut total = 0i64;
    for (status, n) in counts {
        out.push_str(&format!(
            "{} {}: {n}\n",
            status_emoji(status),
            status.as_str()
        ));
        total += n;
    }
    out.push_str(&format!("\nTotal: {total}"));
    say(state, chat, &out).await;
    Ok(())
}

async fn sessions(state: &AppState, chat: ChatId) -> atb_core::Result<()> {
    let phones = state.forwarder.active_phones().await;
    if phones.is_empty() {
        say(state, chat, "No active forwarding sessions.").await;
        return Ok(());
    }
    let mut out = format!("Active forwarding sessions ({}):\n\n", phones.len());
    for phone in phones {
        out.push_str(&phone);
        out.push('\n');
    }
    say(state, chat, &out).await;
    Ok(())
}

async fn payday_notice(state: &AppState, chat: ChatId) -> atb_core::Result<()> {
    let Some(channel) = state.cfg.channel_id else {
        say(state, chat, "No broadcast channel configured (CHANNEL_ID).").await;
        return Ok(());
    };
    let notice = "\u{1f4b0} Payments for today are completed. Payouts resume \
                  tomorrow from 20:00 WAT.";
    state.messenger.send_text(ChatId(channel), notice).await?;
    say(state, chat, "Payday notice sent to the channel.").await;
    Ok(())
}

/// Best-effort reply. Command handlers never fail because Telegram hiccuped.
async fn say(state: &AppState, chat: ChatId, text: &str) {
    if let Err(e) = state.messenger.send_text(chat, text).await {
        warn!("failed to send reply to chat {}: {e}", chat.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_bot_suffix_and_args() {
        assert_eq!(parse_command("/start"), ("start".into(), "".into()));
        assert_eq!(
            parse_command("/mark_paid@account_bot 42 3"),
            ("mark_paid".into(), "42 3".into())
        );
        assert_eq!(
            parse_command("  /Accept 7 +2348167757987 "),
            ("accept".into(), "7 +2348167757987".into())
        );
    }

    #[test]
    fn every_status_has_a_distinct_emoji() {
        let all = [
            AccountStatus::Pending,
            AccountStatus::Accepted,
            AccountStatus::Verified,
            AccountStatus::Paid,
            AccountStatus::Rejected,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(status_emoji(*a), status_emoji(*b));
            }
        }
    }

    #[test]
    fn account_list_formats_ready_count() {
        let rows = vec![AccountRow {
            id: 1,
            user_id: 7,
            username: None,
            phone_number: "+2348167757987".to_string(),
            status: AccountStatus::Verified,
            session_ref: Some("sess".to_string()),
            buyer_id: Some(42),
            created_at: "2026-08-29 10:00:00".to_string(),
            updated_at: "2026-08-29 10:00:00".to_string(),
        }];
        let out = format_account_list(&rows, 1);
        assert!(out.contains("+2348167757987"));
        assert!(out.contains("verified"));
        assert!(out.contains("Ready for payment: 1"));

        assert_eq!(format_account_list(&[], 0), "No accounts submitted yet.");
    }
}
