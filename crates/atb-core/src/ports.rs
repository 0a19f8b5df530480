use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::{ChatId, MessageRef},
    Result,
};

/// Capabilities of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub supports_pin: bool,
    pub max_message_len: usize,
}

/// Hexagonal port for the bot-messaging transport.
///
/// Telegram is the first implementation; the shape is small enough that other
/// chat backends can fit behind it.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;
    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;
    async fn pin_message(&self, msg: MessageRef) -> Result<()>;
}

/// One inbound message observed on an acquired account's session.
#[derive(Clone, Debug)]
pub struct AccountEvent {
    pub sender_id: i64,
    pub sender_username: Option<String>,
    /// Sender is a platform-verified bot (high-confidence OTP source).
    pub sender_is_verified_bot: bool,
    /// Authored by the account owner itself; never forwarded.
    pub outgoing: bool,
    pub text: String,
}

/// Disjoint outcomes of a sign-in attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignInOutcome {
    /// Logged in; `session_ref` identifies the persisted session.
    Success { session_ref: String },
    /// The account still has a 2FA password the seller must remove first.
    PasswordRequired,
    InvalidCode,
    ExpiredCode,
}

/// Hexagonal port for the user-account (MTProto) client.
///
/// Sessions are keyed by phone number; at most one live handle per phone per
/// process. Unexpected transport failures surface as `Error::Transport`.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Ask the platform to send a one-time code to the phone.
    async fn request_code(&self, phone: &str) -> Result<()>;

    async fn sign_in(&self, phone: &str, code: &str) -> Result<SignInOutcome>;

    /// Terminate every other authorized session for the account, leaving this
    /// process as the sole client.
    async fn revoke_other_sessions(&self, phone: &str) -> Result<()>;

    async fn is_authorized(&self, phone: &str) -> Result<bool>;

    /// Subscribe to the live inbound message stream for an acquired phone.
    /// Subscribing again reuses the underlying session rather than opening a
    /// duplicate.
    async fn subscribe(&self, phone: &str) -> Result<mpsc::Receiver<AccountEvent>>;
}
