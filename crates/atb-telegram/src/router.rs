use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atb_core::{
    config::Config,
    convo::AcquisitionMachine,
    forward::OtpForwarder,
    ports::{MessagingPort, SessionTransport},
    store::Database,
    window::OperatingWindow,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<Database>,
    pub window: Arc<OperatingWindow>,
    pub machine: Arc<AcquisitionMachine>,
    pub forwarder: Arc<OtpForwarder>,
    pub messenger: Arc<dyn MessagingPort>,
    pub chat_locks: Arc<ChatLocks>,
}

/// One mutex per chat so a seller's messages are handled in order even when
/// the dispatcher runs handlers concurrently.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Wire everything up and run long polling until the process is stopped.
pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<Database>,
    transport: Arc<dyn SessionTransport>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!("bot started: @{}", me.username());
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));

    let window = Arc::new(OperatingWindow::new(
        cfg.operating_start_hour,
        cfg.operating_end_hour,
    ));
    let cancel = CancellationToken::new();
    let refresh_task = window.clone().spawn_refresh(cfg.window_refresh, cancel.clone());

    let forwarder = Arc::new(OtpForwarder::new(
        messenger.clone(),
        store.clone(),
        transport.clone(),
    ));
    let machine = Arc::new(AcquisitionMachine::new(
        cfg.clone(),
        store.clone(),
        window.clone(),
        transport,
        forwarder.clone(),
        messenger.clone(),
    ));

    let state = Arc::new(AppState {
        cfg,
        store,
        window,
        machine,
        forwarder: forwarder.clone(),
        messenger,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped, shutting down");
    cancel.cancel();
    forwarder.shutdown().await;
    if let Err(e) = refresh_task.await {
        warn!("window refresh task did not shut down cleanly: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_chat_is_serialized_other_chats_are_not() {
        let locks = Arc::new(ChatLocks::default());

        let guard = locks.lock_chat(1).await;

        // A second handler for chat 1 must wait for the first to finish.
        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.lock_chat(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different chat proceeds immediately.
        tokio::time::timeout(Duration::from_millis(100), locks.lock_chat(2))
            .await
            .expect("independent chat must not block");

        drop(guard);
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("queued handler must run once the lock is free")
            .unwrap();
    }
}
