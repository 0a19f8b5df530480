//! End-to-end acquisition through the real in-process transport: phone in,
//! code out, login, forwarding, withdrawal.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use atb_core::{
    config::Config,
    convo::AcquisitionMachine,
    domain::{AccountStatus, ChatId, MessageId, MessageRef, UserId},
    forward::OtpForwarder,
    ports::{AccountEvent, MessagingCapabilities, MessagingPort},
    store::Database,
    window::OperatingWindow,
    Result,
};
use atb_session::InProcessSessionTransport;

const CHAT: ChatId = ChatId(100);
const SELLER: UserId = UserId(100);
const ADMIN: i64 = 999;
const BUYER: i64 = 42;
const PHONE: &str = "+2348167757987";

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingMessenger {
    fn texts_for(&self, chat: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: false,
            supports_pin: false,
            max_message_len: 4096,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id.0, text.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.len() as i32),
        })
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((msg.chat_id.0, text.to_string()));
        Ok(())
    }

    async fn pin_message(&self, _msg: MessageRef) -> Result<()> {
        Ok(())
    }
}

struct World {
    machine: AcquisitionMachine,
    messenger: Arc<RecordingMessenger>,
    transport: Arc<InProcessSessionTransport>,
    store: Arc<Database>,
}

fn world() -> World {
    let cfg = Arc::new(Config {
        bot_token: "token".to_string(),
        api_id: 0,
        api_hash: None,
        admin_id: ADMIN,
        buyer_id: BUYER,
        channel_id: None,
        default_account_password: "pw".to_string(),
        db_path: PathBuf::from("unused"),
        operating_start_hour: 0,
        operating_end_hour: 23,
        window_refresh: Duration::from_secs(300),
    });
    let store = Arc::new(Database::open_in_memory().unwrap());
    // Equal hours wrap the full day, so the gate never closes in tests.
    let window = Arc::new(OperatingWindow::new(0, 0));
    let messenger = Arc::new(RecordingMessenger::default());
    let transport = Arc::new(InProcessSessionTransport::new());
    let forwarder = Arc::new(OtpForwarder::new(
        messenger.clone(),
        store.clone(),
        transport.clone(),
    ));
    let machine = AcquisitionMachine::new(
        cfg,
        store.clone(),
        window,
        transport.clone(),
        forwarder,
        messenger.clone(),
    );
    World {
        machine,
        messenger,
        transport,
        store,
    }
}

async fn acquire(w: &World) {
    w.machine
        .on_text(CHAT, SELLER, Some("seller"), PHONE)
        .await
        .unwrap();
    let code = w.transport.issued_code(PHONE).unwrap();
    w.machine.on_text(CHAT, SELLER, None, &code).await.unwrap();
}

/// Wait until the forward audit row shows up; the relay runs on its own task.
async fn wait_for_forwards(w: &World, n: usize) {
    for _ in 0..100 {
        if w.store.forwards_for_phone(PHONE).unwrap().len() >= n {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("forward audit row never appeared");
}

#[tokio::test]
async fn full_acquisition_then_otp_relay() {
    let w = world();
    acquire(&w).await;

    let row = w.store.account_by_phone(PHONE).unwrap().unwrap();
    assert_eq!(row.status, AccountStatus::Accepted);
    assert_eq!(row.session_ref, Some(format!("inproc:{PHONE}")));
    assert_eq!(row.buyer_id, Some(BUYER));

    // The process is left as the sole client for the account.
    assert_eq!(w.transport.revocations(PHONE), 1);
    assert_eq!(w.machine.active_sessions().await, vec![PHONE.to_string()]);

    // A platform login code arrives on the acquired session.
    w.transport
        .deliver(
            PHONE,
            AccountEvent {
                sender_id: 777_000,
                sender_username: Some("Telegram".to_string()),
                sender_is_verified_bot: false,
                outgoing: false,
                text: "Login code: 54321. Do not give this code to anyone.".to_string(),
            },
        )
        .await
        .unwrap();
    wait_for_forwards(&w, 1).await;

    let relayed = w.messenger.texts_for(BUYER);
    assert_eq!(relayed.len(), 1);
    assert!(relayed[0].contains(PHONE));
    assert!(relayed[0].contains("Login code: 54321"));

    let audit = w.store.forwards_for_phone(PHONE).unwrap();
    assert_eq!(audit[0].buyer_id, BUYER);
}

#[tokio::test]
async fn chatter_on_the_account_is_not_relayed() {
    let w = world();
    acquire(&w).await;

    // Ordinary conversation from a human contact, then a real code.
    w.transport
        .deliver(
            PHONE,
            AccountEvent {
                sender_id: 5000,
                sender_username: Some("friend".to_string()),
                sender_is_verified_bot: false,
                outgoing: false,
                text: "hey, are you coming tonight?".to_string(),
            },
        )
        .await
        .unwrap();
    w.transport
        .deliver(
            PHONE,
            AccountEvent {
                sender_id: 5001,
                sender_username: None,
                sender_is_verified_bot: true,
                outgoing: false,
                text: "Your verification code is 882133".to_string(),
            },
        )
        .await
        .unwrap();
    wait_for_forwards(&w, 1).await;

    let relayed = w.messenger.texts_for(BUYER);
    assert_eq!(relayed.len(), 1);
    assert!(relayed[0].contains("882133"));
}

#[tokio::test]
async fn wrong_code_then_retry_succeeds() {
    let w = world();
    w.machine.on_text(CHAT, SELLER, None, PHONE).await.unwrap();
    w.machine.on_text(CHAT, SELLER, None, "00000").await.unwrap();

    // The bad attempt dropped the conversation back to idle.
    assert!(w.store.account_by_phone(PHONE).unwrap().is_none());

    // Resubmitting issues a fresh code and completes.
    w.machine.on_text(CHAT, SELLER, None, PHONE).await.unwrap();
    let code = w.transport.issued_code(PHONE).unwrap();
    w.machine.on_text(CHAT, SELLER, None, &code).await.unwrap();
    assert!(w.store.account_by_phone(PHONE).unwrap().is_some());
}

#[tokio::test]
async fn two_fa_account_is_turned_away() {
    let w = world();
    w.transport.set_password(PHONE, true);

    w.machine.on_text(CHAT, SELLER, None, PHONE).await.unwrap();
    let code = w.transport.issued_code(PHONE).unwrap();
    w.machine.on_text(CHAT, SELLER, None, &code).await.unwrap();

    assert!(w.store.account_by_phone(PHONE).unwrap().is_none());
    assert!(w.machine.active_sessions().await.is_empty());
    let texts = w.messenger.texts_for(CHAT.0);
    assert!(texts.last().unwrap().contains("2FA"));
}

#[tokio::test]
async fn withdrawal_settles_through_mark_paid() {
    let w = world();
    acquire(&w).await;

    w.machine.begin_withdrawal(CHAT, SELLER).await.unwrap();
    w.machine
        .on_text(CHAT, SELLER, None, "9131085651 OPay Bashir Rabiu")
        .await
        .unwrap();

    let admin_texts = w.messenger.texts_for(ADMIN);
    assert!(admin_texts.last().unwrap().contains("PAYOUT REQUEST"));

    // Admin settles; accounts flip to paid and the request completes.
    assert!(w.store.mark_accounts_paid(SELLER.0, 1).unwrap());
    let row = w.store.account_by_phone(PHONE).unwrap().unwrap();
    assert_eq!(row.status, AccountStatus::Paid);
    assert_eq!(w.store.ready_count(SELLER.0).unwrap(), 0);
}
