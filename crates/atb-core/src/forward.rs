//! Per-account OTP forwarding.
//!
//! After a successful login one listener is registered per phone number. It
//! consumes the session's inbound message stream for the lifetime of the
//! session, relays probable OTPs to the assigned buyer, and appends every
//! relay to the audit log. Forwarding is never gated by the operating window.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    domain::{ChatId, TELEGRAM_SYSTEM_SENDER},
    otp::is_probable_otp,
    ports::{AccountEvent, MessagingPort, SessionTransport},
    store::Database,
    Result,
};

/// One registered listener: explicit phone + buyer, no captured closures.
struct Listener {
    buyer: ChatId,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct OtpForwarder {
    messenger: Arc<dyn MessagingPort>,
    store: Arc<Database>,
    transport: Arc<dyn SessionTransport>,
    listeners: Mutex<HashMap<String, Listener>>,
}

impl OtpForwarder {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        store: Arc<Database>,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        Self {
            messenger,
            store,
            transport,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a listener for `phone`, relaying matches to `buyer`.
    ///
    /// Returns false when a listener already exists for the phone; it is
    /// re-activated and reused rather than duplicated.
    pub async fn start_forwarding(&self, phone: &str, buyer: ChatId) -> Result<bool> {
        let mut listeners = self.listeners.lock().await;
        if let Some(existing) = listeners.get(phone) {
            existing.active.store(true, Ordering::Relaxed);
            info!("forwarding for {phone} already attached, reusing");
            return Ok(false);
        }

        let rx = self.transport.subscribe(phone).await?;
        let active = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_listener(
            phone.to_string(),
            buyer,
            active.clone(),
            cancel.clone(),
            rx,
            self.messenger.clone(),
            self.store.clone(),
        ));

        listeners.insert(
            phone.to_string(),
            Listener {
                buyer,
                active,
                cancel,
                task,
            },
        );
        info!("OTP forwarding started for {phone} -> buyer {}", buyer.0);
        Ok(true)
    }

    /// Stop relaying for `phone`. The underlying subscription is kept; the
    /// contract is only that no further messages are relayed.
    pub async fn stop_forwarding(&self, phone: &str) {
        let listeners = self.listeners.lock().await;
        if let Some(l) = listeners.get(phone) {
            l.active.store(false, Ordering::Relaxed);
            info!("OTP forwarding stopped for {phone}");
        }
    }

    pub async fn is_active(&self, phone: &str) -> bool {
        let listeners = self.listeners.lock().await;
        listeners
            .get(phone)
            .map(|l| l.active.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub async fn buyer_for(&self, phone: &str) -> Option<ChatId> {
        let listeners = self.listeners.lock().await;
        listeners.get(phone).map(|l| l.buyer)
    }

    /// Phones currently relaying, sorted for stable display.
    pub async fn active_phones(&self) -> Vec<String> {
        let listeners = self.listeners.lock().await;
        let mut phones: Vec<String> = listeners
            .iter()
            .filter(|(_, l)| l.active.load(Ordering::Relaxed))
            .map(|(p, _)| p.clone())
            .collect();
        phones.sort();
        phones
    }

    /// Tear down every listener task (process shutdown).
    pub async fn shutdown(&self) {
        let mut listeners = self.listeners.lock().await;
        for (phone, l) in listeners.drain() {
            l.active.store(false, Ordering::Relaxed);
            l.cancel.cancel();
            l.task.abort();
            info!("forwarding listener for {phone} torn down");
        }
    }
}

/// Accept a message for relay: classifier match OR a platform-system sender.
/// The sender-identity check is an independent acceptance path, not a filter
/// on top of the classifier.
fn should_forward(event: &AccountEvent) -> bool {
    if event.outgoing {
        return false;
    }
    is_probable_otp(&event.text) || is_platform_sender(event)
}

fn is_platform_sender(event: &AccountEvent) -> bool {
    if event.sender_id == TELEGRAM_SYSTEM_SENDER || event.sender_is_verified_bot {
        return true;
    }
    event
        .sender_username
        .as_deref()
        .map(|u| u.to_ascii_lowercase().contains("telegram"))
        .unwrap_or(false)
}

async fn run_listener(
    phone: String,
    buyer: ChatId,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    mut rx: mpsc::Receiver<AccountEvent>,
    messenger: Arc<dyn MessagingPort>,
    store: Arc<Database>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break, // session stream ended
            },
        };

        if !active.load(Ordering::Relaxed) {
            continue;
        }
        if !should_forward(&event) {
            continue;
        }

        // Relay failures are logged and swallowed; they never terminate the
        // listener or the session.
        let relay = format!("OTP from account {phone}:\n\n{}", event.text);
        if let Err(e) = messenger.send_text(buyer, &relay).await {
            warn!("failed to relay OTP from {phone} to buyer {}: {e}", buyer.0);
        }
        if let Err(e) = store.record_forward(&phone, buyer.0, &event.text) {
            warn!("failed to record OTP forward for {phone}: {e}");
        }
    }
    info!("forwarding listener for {phone} exited");
}
