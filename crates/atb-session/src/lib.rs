//! In-process session transport.
//!
//! Implements `atb-core`'s `SessionTransport` against scripted accounts held
//! in memory. Used two ways:
//!
//! - by the binary when no MTProto credentials are configured (dry-run, the
//!   same posture the deployment takes before real API credentials exist);
//! - by the end-to-end tests, which script login outcomes and inject inbound
//!   account messages.
//!
//! A production MTProto client implements the same port and drops in without
//! touching the core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use atb_core::{
    ports::{AccountEvent, SessionTransport, SignInOutcome},
    Error, Result,
};

const INBOX_DEPTH: usize = 32;

#[derive(Default)]
struct SimAccount {
    /// A 2FA password the seller has not removed yet.
    password_set: bool,
    issued_code: Option<String>,
    code_expired: bool,
    authorized: bool,
    revocations: u64,
    inbox: Option<mpsc::Sender<AccountEvent>>,
}

#[derive(Default)]
pub struct InProcessSessionTransport {
    accounts: Mutex<HashMap<String, SimAccount>>,
    code_seq: AtomicU64,
}

impl InProcessSessionTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_account<T>(&self, phone: &str, f: impl FnOnce(&mut SimAccount) -> T) -> Result<T> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| Error::External("transport lock poisoned".to_string()))?;
        Ok(f(accounts.entry(phone.to_string()).or_default()))
    }

    // -- scripting surface (tests and dry-run tooling) --

    /// Pretend the account still has a 2FA password set.
    pub fn set_password(&self, phone: &str, set: bool) {
        let _ = self.with_account(phone, |a| a.password_set = set);
    }

    /// Mark the currently issued code as expired.
    pub fn expire_code(&self, phone: &str) {
        let _ = self.with_account(phone, |a| a.code_expired = true);
    }

    /// The code that `request_code` issued for this phone, if any.
    pub fn issued_code(&self, phone: &str) -> Option<String> {
        self.with_account(phone, |a| a.issued_code.clone())
            .ok()
            .flatten()
    }

    pub fn revocations(&self, phone: &str) -> u64 {
        self.with_account(phone, |a| a.revocations).unwrap_or(0)
    }

    /// Push an inbound message onto the phone's live stream.
    pub async fn deliver(&self, phone: &str, event: AccountEvent) -> Result<()> {
        let tx = self.with_account(phone, |a| a.inbox.clone())?;
        let Some(tx) = tx else {
            return Err(Error::Transport(format!("no subscription for {phone}")));
        };
        tx.send(event)
            .await
            .map_err(|_| Error::Transport(format!("subscription for {phone} closed")))
    }
}

#[async_trait]
impl SessionTransport for InProcessSessionTransport {
    async fn request_code(&self, phone: &str) -> Result<()> {
        let seq = self.code_seq.fetch_add(1, Ordering::Relaxed);
        let code = format!("{:05}", 10000 + (seq % 89999));
        self.with_account(phone, |a| {
            a.issued_code = Some(code.clone());
            a.code_expired = false;
        })?;
        info!("issued login code for {phone}");
        Ok(())
    }

    async fn sign_in(&self, phone: &str, code: &str) -> Result<SignInOutcome> {
        self.with_account(phone, |a| {
            let Some(issued) = a.issued_code.as_deref() else {
                return SignInOutcome::ExpiredCode; // nothing outstanding
            };
            if a.code_expired {
                return SignInOutcome::ExpiredCode;
            }
            if a.password_set {
                return SignInOutcome::PasswordRequired;
            }
            if issued != code {
                return SignInOutcome::InvalidCode;
            }
            a.issued_code = None;
            a.authorized = true;
            SignInOutcome::Success {
                session_ref: format!("inproc:{phone}"),
            }
        })
    }

    async fn revoke_other_sessions(&self, phone: &str) -> Result<()> {
        self.with_account(phone, |a| {
            if !a.authorized {
                return Err(Error::Transport(format!("{phone} is not authorized")));
            }
            a.revocations += 1;
            Ok(())
        })?
    }

    async fn is_authorized(&self, phone: &str) -> Result<bool> {
        self.with_account(phone, |a| a.authorized)
    }

    async fn subscribe(&self, phone: &str) -> Result<mpsc::Receiver<AccountEvent>> {
        self.with_account(phone, |a| {
            if !a.authorized {
                return Err(Error::Transport(format!("{phone} is not authorized")));
            }
            if a.inbox.is_some() {
                warn!("replacing existing subscription for {phone}");
            }
            let (tx, rx) = mpsc::channel(INBOX_DEPTH);
            a.inbox = Some(tx);
            Ok(rx)
        })?
    }
}
