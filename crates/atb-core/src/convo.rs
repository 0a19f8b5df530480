//! Session-acquisition state machine.
//!
//! One short-lived conversation per seller: phone -> OTP -> login, plus the
//! withdrawal sub-flow (bank details). State is an explicit per-user map owned
//! by this component; concurrent users never interfere, `/cancel` resets a
//! conversation unconditionally, and a stale OTP wait expires after
//! [`OTP_STATE_TTL`].
//!
//! Every failure path degrades to "return to idle and tell the user"; nothing
//! here is fatal to the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    domain::{ChatId, UserId},
    forward::OtpForwarder,
    ports::{MessagingPort, SessionTransport, SignInOutcome},
    store::Database,
    validate::{classify_country, validate_bank_details, validate_phone},
    window::OperatingWindow,
    Result,
};

/// How long an `AwaitingOtp` state stays valid before the seller must resend
/// the phone number.
pub const OTP_STATE_TTL: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq)]
enum ConvState {
    /// Neutral and receptive: free text is treated as a phone submission.
    Idle,
    /// A code was requested for `phone`; the next message should be the OTP.
    AwaitingOtp { phone: String },
    /// The withdrawal sub-flow asked for bank details.
    AwaitingBankDetails,
}

struct ConvEntry {
    state: ConvState,
    touched: Instant,
}

enum StateLookup {
    Current(ConvState),
    Expired,
}

pub struct AcquisitionMachine {
    cfg: Arc<Config>,
    store: Arc<Database>,
    window: Arc<OperatingWindow>,
    transport: Arc<dyn SessionTransport>,
    forwarder: Arc<OtpForwarder>,
    messenger: Arc<dyn MessagingPort>,
    states: Mutex<HashMap<i64, ConvEntry>>,
}

impl AcquisitionMachine {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<Database>,
        window: Arc<OperatingWindow>,
        transport: Arc<dyn SessionTransport>,
        forwarder: Arc<OtpForwarder>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            cfg,
            store,
            window,
            transport,
            forwarder,
            messenger,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// `/start`: welcome the seller (pin best-effort) and reset to idle.
    pub async fn start(&self, chat: ChatId, user: UserId) -> Result<()> {
        self.set_state(user, ConvState::Idle).await;

        let welcome = "Welcome to the account intake desk.\n\n\
            To begin, send the phone number of the account you want to sell \
            (example: +2348167757987).\n\n\
            IMPORTANT: remove Two-Factor Authentication (2FA) from the account \
            before submitting the number.";
        match self.messenger.send_text(chat, welcome).await {
            Ok(msg) => {
                // Pinning is cosmetic; ignore chats where the bot cannot pin.
                if let Err(e) = self.messenger.pin_message(msg).await {
                    warn!("could not pin welcome message: {e}");
                }
            }
            Err(e) => warn!("failed to send welcome: {e}"),
        }
        Ok(())
    }

    /// `/cancel`: unconditional reset to idle.
    pub async fn cancel(&self, chat: ChatId, user: UserId) -> Result<()> {
        self.states.lock().await.remove(&user.0);
        self.say(chat, "Operation cancelled.").await;
        Ok(())
    }

    /// `/withdraw`: enter the bank-details sub-flow if the window is open and
    /// the seller has at least one payable account.
    pub async fn begin_withdrawal(&self, chat: ChatId, user: UserId) -> Result<()> {
        if !self.window.is_open() {
            let msg = format!(
                "Payouts are closed for today. They resume {}.",
                self.window.next_opening_message()
            );
            self.say(chat, &msg).await;
            return Ok(());
        }

        let ready = self.store.ready_count(user.0)?;
        if ready == 0 {
            self.say(
                chat,
                "You have no accounts ready for payment. Submit accounts before \
                 requesting a payout.",
            )
            .await;
            return Ok(());
        }

        self.say(
            chat,
            "Send your bank account number, bank name and account holder name.\n\n\
             Example: 9131085651 OPay Bashir Rabiu\n\n\
             The admin will send your payment on time.",
        )
        .await;
        self.set_state(user, ConvState::AwaitingBankDetails).await;
        Ok(())
    }

    /// Route a free-text message through the current conversation state.
    ///
    /// Infallible by contract: an unexpected failure (store included) is
    /// logged, the seller gets a generic reply, and the conversation resets
    /// to idle instead of staying wedged in a waiting state.
    pub async fn on_text(
        &self,
        chat: ChatId,
        user: UserId,
        username: Option<&str>,
        text: &str,
    ) -> Result<()> {
        if let Err(e) = self.dispatch_text(chat, user, username, text).await {
            error!("conversation step failed for user {}: {e}", user.0);
            self.states.lock().await.remove(&user.0);
            self.say(
                chat,
                "An error occurred. Please start over by sending the phone number.",
            )
            .await;
        }
        Ok(())
    }

    async fn dispatch_text(
        &self,
        chat: ChatId,
        user: UserId,
        username: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let state = match self.current_state(user).await {
            StateLookup::Expired => {
                self.say(
                    chat,
                    "Your code request expired. Send the phone number again to restart.",
                )
                .await;
                return Ok(());
            }
            StateLookup::Current(state) => state,
        };
        match state {
            ConvState::Idle => self.handle_phone(chat, user, text).await,
            ConvState::AwaitingOtp { phone } => {
                self.handle_otp(chat, user, username, &phone, text).await
            }
            ConvState::AwaitingBankDetails => self.handle_bank_details(chat, user, text).await,
        }
    }

    /// Phones with a live forwarding listener (admin `/sessions`).
    pub async fn active_sessions(&self) -> Vec<String> {
        self.forwarder.active_phones().await
    }

    // -- transitions --

    async fn handle_phone(&self, chat: ChatId, user: UserId, text: &str) -> Result<()> {
        let Some(phone) = validate_phone(text) else {
            self.say(
                chat,
                "That phone number does not look right. Send it like this: \
                 +2348167757987",
            )
            .await;
            return Ok(()); // stay receptive
        };

        if !self.window.is_open() {
            let msg = format!(
                "Account intake is closed for today. We reopen {}. Please try again then.",
                self.window.next_opening_message()
            );
            self.say(chat, &msg).await;
            return Ok(());
        }

        if self.store.phone_exists(&phone)? {
            let msg = format!(
                "This number is already registered!\n\n{phone}\n| {}\n\n\
                 It cannot be submitted again.",
                classify_country(&phone)
            );
            self.say(chat, &msg).await;
            return Ok(());
        }

        if let Err(e) = self.transport.request_code(&phone).await {
            error!("code request for {phone} failed: {e}");
            self.say(chat, "An error occurred while contacting the platform. Please try again.")
                .await;
            return Ok(());
        }

        self.set_state(user, ConvState::AwaitingOtp { phone: phone.clone() })
            .await;
        let msg = format!(
            "Processing...\n\n\
             A one-time code (OTP) was sent to {phone}. Send that code here.\n\n\
             Or send /cancel to abort."
        );
        self.say(chat, &msg).await;
        Ok(())
    }

    async fn handle_otp(
        &self,
        chat: ChatId,
        user: UserId,
        username: Option<&str>,
        phone: &str,
        text: &str,
    ) -> Result<()> {
        let code = text.trim();
        if !(code.len() == 5 || code.len() == 6) || !code.chars().all(|c| c.is_ascii_digit()) {
            self.say(chat, "That code does not look right. Send the 5- or 6-digit code.")
                .await;
            return Ok(()); // stay in AwaitingOtp
        }

        let progress = self.messenger.send_text(chat, "Signing in... please wait.").await;

        let outcome = self.transport.sign_in(phone, code).await;
        let reply = match outcome {
            Ok(SignInOutcome::Success { session_ref }) => {
                self.finish_login(chat, user, username, phone, &session_ref)
                    .await?
            }
            Ok(SignInOutcome::PasswordRequired) => {
                "The account still has a 2FA password. Remove 2FA and submit the \
                 number again."
                    .to_string()
            }
            Ok(SignInOutcome::InvalidCode) => {
                "The code is wrong. Please start over with the phone number.".to_string()
            }
            Ok(SignInOutcome::ExpiredCode) => {
                "The code has expired. Please request a new one by sending the \
                 phone number again."
                    .to_string()
            }
            Err(e) => {
                error!("sign-in for {phone} failed: {e}");
                "An error occurred while signing in. Please try again.".to_string()
            }
        };

        // Edit the progress message in place when we can, otherwise just send.
        match progress {
            Ok(msg) => {
                if let Err(e) = self.messenger.edit_text(msg, &reply).await {
                    warn!("failed to edit progress message: {e}");
                    self.say(chat, &reply).await;
                }
            }
            Err(_) => self.say(chat, &reply).await,
        }

        self.set_state(user, ConvState::Idle).await;
        Ok(())
    }

    /// Post-login bookkeeping: persist the account, attach the forwarding
    /// listener, and leave this process as the account's only client.
    async fn finish_login(
        &self,
        _chat: ChatId,
        user: UserId,
        username: Option<&str>,
        phone: &str,
        session_ref: &str,
    ) -> Result<String> {
        use crate::domain::AccountStatus;

        let buyer = self.cfg.buyer_id;

        // Create if absent; a row may already exist from a raced submission.
        let created = self.store.create_account(user.0, username, phone)?;
        if !created {
            info!("account row for {phone} already present, updating in place");
        }
        self.store
            .update_account_status(phone, AccountStatus::Accepted, Some(session_ref), Some(buyer))?;

        if let Err(e) = self
            .forwarder
            .start_forwarding(phone, ChatId(buyer))
            .await
        {
            error!("failed to start OTP forwarding for {phone}: {e}");
        }

        // Security measure: the bot becomes the sole authorized client.
        if let Err(e) = self.transport.revoke_other_sessions(phone).await {
            warn!("could not revoke other sessions for {phone}: {e}");
        }

        // Setting a fresh 2FA password on the acquired account is intended but
        // not performed against the real transport; see DESIGN.md.
        info!("acquired {phone} for seller {}; password rotation skipped", user.0);

        Ok(
            "Your account was logged in successfully. Remove it from your device. \
             You will be paid per account submitted; payouts run from 20:00 WAT. \
             Request payment with /withdraw."
                .to_string(),
        )
    }

    async fn handle_bank_details(&self, chat: ChatId, user: UserId, text: &str) -> Result<()> {
        let details = text.trim();
        if !validate_bank_details(details) {
            self.say(
                chat,
                "Those bank details do not look right. Send them like this:\n\
                 9131085651 OPay Bashir Rabiu",
            )
            .await;
            return Ok(()); // stay in AwaitingBankDetails
        }

        let count = self.store.ready_count(user.0)?;
        if count == 0 {
            self.say(chat, "You have no accounts ready for payment.").await;
            self.set_state(user, ConvState::Idle).await;
            return Ok(());
        }

        self.store.create_withdrawal(user.0, details, count)?;

        let msg = format!(
            "Payout request received.\nAccounts: {count}\n\
             The admin will send your payment on time."
        );
        self.say(chat, &msg).await;

        // Out-of-band admin notice; never blocks the seller's transaction.
        let admin_msg = format!(
            "PAYOUT REQUEST\n\n\
             User ID: {user_id}\n\
             Accounts claimed: {count}\n\
             Bank details: {details}\n\n\
             Reply /mark_paid {user_id} {count} to settle.",
            user_id = user.0,
        );
        if let Err(e) = self
            .messenger
            .send_text(ChatId(self.cfg.admin_id), &admin_msg)
            .await
        {
            error!("failed to notify admin of withdrawal: {e}");
        }

        self.set_state(user, ConvState::Idle).await;
        Ok(())
    }

    // -- state plumbing --

    async fn set_state(&self, user: UserId, state: ConvState) {
        let mut states = self.states.lock().await;
        if state == ConvState::Idle {
            states.remove(&user.0);
        } else {
            states.insert(
                user.0,
                ConvEntry {
                    state,
                    touched: Instant::now(),
                },
            );
        }
    }

    /// Load the user's state, expiring a stale OTP wait in passing.
    async fn current_state(&self, user: UserId) -> StateLookup {
        let mut states = self.states.lock().await;
        let Some(entry) = states.get(&user.0) else {
            return StateLookup::Current(ConvState::Idle);
        };

        if matches!(entry.state, ConvState::AwaitingOtp { .. })
            && entry.touched.elapsed() > OTP_STATE_TTL
        {
            states.remove(&user.0);
            return StateLookup::Expired;
        }

        StateLookup::Current(entry.state.clone())
    }

    /// Send a reply, logging (never propagating) transport failures: a failed
    /// notification must not wedge the conversation.
    async fn say(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.messenger.send_text(chat, text).await {
            warn!("failed to send message to chat {}: {e}", chat.0);
        }
    }
}
