use rusqlite::Connection;
use tracing::debug;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user_accounts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            username        TEXT,
            phone_number    TEXT NOT NULL UNIQUE,
            status          TEXT NOT NULL DEFAULT 'pending',
            session_ref     TEXT,
            buyer_id        INTEGER,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_user_accounts_user_status
            ON user_accounts(user_id, status);

        CREATE TABLE IF NOT EXISTS withdrawal_requests (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            bank_details    TEXT NOT NULL,
            account_count   INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_withdrawals_user_status
            ON withdrawal_requests(user_id, status);

        -- Append-only audit trail; rows are never mutated or deleted.
        CREATE TABLE IF NOT EXISTS otp_forwards (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            phone_number    TEXT NOT NULL,
            buyer_id        INTEGER NOT NULL,
            otp_message     TEXT NOT NULL,
            forwarded_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_otp_forwards_phone
            ON otp_forwards(phone_number);

        -- Reserved key-value settings table.
        CREATE TABLE IF NOT EXISTS system_settings (
            key             TEXT PRIMARY KEY,
            value           TEXT NOT NULL,
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    debug!("store migrations complete");
    Ok(())
}
