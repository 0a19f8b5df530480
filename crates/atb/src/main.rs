use std::sync::Arc;

use tracing::warn;

use atb_core::{config::Config, ports::SessionTransport, store::Database};
use atb_session::InProcessSessionTransport;

#[tokio::main]
async fn main() -> Result<(), atb_core::Error> {
    atb_core::logging::init("atb")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(Database::open(&cfg.db_path)?);

    // Logins run against the in-process transport; a real MTProto client
    // implements the same port (see DESIGN.md).
    let transport: Arc<dyn SessionTransport> = Arc::new(InProcessSessionTransport::new());
    if !cfg.dry_run_transport() {
        warn!("API_ID/API_HASH are set but no MTProto backend is built in; logins are simulated");
    }

    atb_telegram::router::run_polling(cfg, store, transport)
        .await
        .map_err(|e| atb_core::Error::External(format!("bot failed: {e}")))?;

    Ok(())
}
