use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::AccountStatus;
use crate::store::models::{AccountRow, OtpForwardRow, WithdrawalRow};
use crate::store::Database;
use crate::{Error, Result};

const READY_STATUSES: &str = "('accepted','verified')";

impl Database {
    // -- Accounts --

    /// Insert a new account row (status `pending`). Returns false when the
    /// phone number is already registered; the existing row is untouched.
    pub fn create_account(
        &self,
        user_id: i64,
        username: Option<&str>,
        phone_number: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let res = conn.execute(
                "INSERT INTO user_accounts (user_id, username, phone_number)
                 VALUES (?1, ?2, ?3)",
                params![user_id, username, phone_number],
            );
            match res {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn phone_exists(&self, phone_number: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM user_accounts WHERE phone_number = ?1",
                [phone_number],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Update status and, when provided, the session reference and buyer.
    pub fn update_account_status(
        &self,
        phone_number: &str,
        status: AccountStatus,
        session_ref: Option<&str>,
        buyer_id: Option<i64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE user_accounts
                 SET status = ?1,
                     session_ref = COALESCE(?2, session_ref),
                     buyer_id = COALESCE(?3, buyer_id),
                     updated_at = datetime('now')
                 WHERE phone_number = ?4",
                params![status.as_str(), session_ref, buyer_id, phone_number],
            )?;
            Ok(())
        })
    }

    pub fn account_by_phone(&self, phone_number: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, username, phone_number, status, session_ref,
                            buyer_id, created_at, updated_at
                     FROM user_accounts WHERE phone_number = ?1",
                    [phone_number],
                    map_account_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn accounts_for_user(&self, user_id: i64) -> Result<Vec<AccountRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, username, phone_number, status, session_ref,
                        buyer_id, created_at, updated_at
                 FROM user_accounts WHERE user_id = ?1
                 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([user_id], map_account_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Count of this user's accounts currently payable (`accepted`/`verified`).
    pub fn ready_count(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| ready_count_on(conn, user_id))
    }

    pub fn buyer_for_phone(&self, phone_number: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let buyer = conn
                .query_row(
                    "SELECT buyer_id FROM user_accounts
                     WHERE phone_number = ?1 AND buyer_id IS NOT NULL",
                    [phone_number],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(buyer)
        })
    }

    pub fn status_counts(&self) -> Result<Vec<(AccountStatus, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM user_accounts GROUP BY status ORDER BY status",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Settle payment for `count` of the user's oldest payable accounts and
    /// close all of their pending withdrawal requests, atomically.
    ///
    /// Returns false (no mutation) when `count` exceeds the payable total.
    pub fn mark_accounts_paid(&self, user_id: i64, count: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let ready = ready_count_on(&tx, user_id)?;
            if count <= 0 || count > ready {
                return Ok(false);
            }

            tx.execute(
                &format!(
                    "UPDATE user_accounts
                     SET status = 'paid', updated_at = datetime('now')
                     WHERE id IN (
                         SELECT id FROM user_accounts
                         WHERE user_id = ?1 AND status IN {READY_STATUSES}
                         ORDER BY created_at, id
                         LIMIT ?2
                     )"
                ),
                params![user_id, count],
            )?;

            tx.execute(
                "UPDATE withdrawal_requests
                 SET status = 'completed', processed_at = datetime('now')
                 WHERE user_id = ?1 AND status = 'pending'",
                [user_id],
            )?;

            tx.commit()?;
            Ok(true)
        })
    }

    // -- Withdrawals --

    /// Record a payout ask. The claimed count must not exceed the user's
    /// payable total at submission time; violations are rejected unstored.
    pub fn create_withdrawal(
        &self,
        user_id: i64,
        bank_details: &str,
        account_count: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let ready = ready_count_on(&tx, user_id)?;
            if account_count <= 0 || account_count > ready {
                return Err(Error::Validation(format!(
                    "withdrawal for {account_count} accounts but only {ready} are payable"
                )));
            }

            tx.execute(
                "INSERT INTO withdrawal_requests (user_id, bank_details, account_count)
                 VALUES (?1, ?2, ?3)",
                params![user_id, bank_details, account_count],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn withdrawals_for_user(&self, user_id: i64) -> Result<Vec<WithdrawalRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, bank_details, account_count, status, created_at, processed_at
                 FROM withdrawal_requests WHERE user_id = ?1
                 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(WithdrawalRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        bank_details: row.get(2)?,
                        account_count: row.get(3)?,
                        status: row.get(4)?,
                        created_at: row.get(5)?,
                        processed_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- OTP forwarding audit log --

    pub fn record_forward(&self, phone_number: &str, buyer_id: i64, otp_message: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO otp_forwards (phone_number, buyer_id, otp_message)
                 VALUES (?1, ?2, ?3)",
                params![phone_number, buyer_id, otp_message],
            )?;
            Ok(())
        })
    }

    pub fn forwards_for_phone(&self, phone_number: &str) -> Result<Vec<OtpForwardRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, phone_number, buyer_id, otp_message, forwarded_at
                 FROM otp_forwards WHERE phone_number = ?1
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([phone_number], |row| {
                    Ok(OtpForwardRow {
                        id: row.get(0)?,
                        phone_number: row.get(1)?,
                        buyer_id: row.get(2)?,
                        otp_message: row.get(3)?,
                        forwarded_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Settings (reserved) --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO system_settings (key, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let v = conn
                .query_row(
                    "SELECT value FROM system_settings WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(v)
        })
    }
}

fn ready_count_on(conn: &Connection, user_id: i64) -> Result<i64> {
    let n: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM user_accounts
             WHERE user_id = ?1 AND status IN {READY_STATUSES}"
        ),
        [user_id],
        |row| row.get(0),
    )?;
    Ok(n)
}

fn map_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        phone_number: row.get(3)?,
        status: row.get(4)?,
        session_ref: row.get(5)?,
        buyer_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WithdrawalStatus;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_ready(db: &Database, user_id: i64, phones: &[&str]) {
        for phone in phones {
            assert!(db.create_account(user_id, Some("seller"), phone).unwrap());
            db.update_account_status(phone, AccountStatus::Accepted, Some("sess"), Some(42))
                .unwrap();
        }
    }

    #[test]
    fn duplicate_phone_keeps_exactly_one_row() {
        let db = db();
        assert!(db.create_account(1, Some("a"), "+2348167757987").unwrap());
        assert!(!db.create_account(2, Some("b"), "+2348167757987").unwrap());

        let row = db.account_by_phone("+2348167757987").unwrap().unwrap();
        assert_eq!(row.user_id, 1);
        assert!(db.phone_exists("+2348167757987").unwrap());
        assert!(!db.phone_exists("+2348000000000").unwrap());
    }

    #[test]
    fn status_update_sets_session_and_buyer_without_clobbering() {
        let db = db();
        db.create_account(1, None, "+2348167757987").unwrap();
        db.update_account_status("+2348167757987", AccountStatus::Accepted, Some("s1"), Some(42))
            .unwrap();
        // A later status-only update keeps session_ref and buyer_id.
        db.update_account_status("+2348167757987", AccountStatus::Verified, None, None)
            .unwrap();

        let row = db.account_by_phone("+2348167757987").unwrap().unwrap();
        assert_eq!(row.status, AccountStatus::Verified);
        assert_eq!(row.session_ref.as_deref(), Some("s1"));
        assert_eq!(row.buyer_id, Some(42));
        assert_eq!(db.buyer_for_phone("+2348167757987").unwrap(), Some(42));
    }

    #[test]
    fn ready_count_tracks_accepted_and_verified_only() {
        let db = db();
        seed_ready(&db, 7, &["+2348100000001", "+2348100000002"]);
        db.create_account(7, None, "+2348100000003").unwrap(); // stays pending
        assert_eq!(db.ready_count(7).unwrap(), 2);

        db.update_account_status("+2348100000001", AccountStatus::Verified, None, None)
            .unwrap();
        assert_eq!(db.ready_count(7).unwrap(), 2);

        db.update_account_status("+2348100000002", AccountStatus::Rejected, None, None)
            .unwrap();
        assert_eq!(db.ready_count(7).unwrap(), 1);
    }

    #[test]
    fn mark_paid_refuses_overcount_without_mutation() {
        let db = db();
        seed_ready(&db, 7, &["+2348100000001", "+2348100000002"]);
        db.create_withdrawal(7, "9131085651 OPay Bashir Rabiu", 2)
            .unwrap();

        assert!(!db.mark_accounts_paid(7, 3).unwrap());
        assert_eq!(db.ready_count(7).unwrap(), 2);
        let w = &db.withdrawals_for_user(7).unwrap()[0];
        assert_eq!(w.status, WithdrawalStatus::Pending);
        assert!(w.processed_at.is_none());
    }

    #[test]
    fn mark_paid_settles_exactly_count_and_closes_withdrawals() {
        let db = db();
        seed_ready(
            &db,
            7,
            &["+2348100000001", "+2348100000002", "+2348100000003"],
        );
        db.create_withdrawal(7, "9131085651 OPay Bashir Rabiu", 3)
            .unwrap();

        assert!(db.mark_accounts_paid(7, 2).unwrap());
        assert_eq!(db.ready_count(7).unwrap(), 1);

        let paid = db
            .accounts_for_user(7)
            .unwrap()
            .into_iter()
            .filter(|a| a.status == AccountStatus::Paid)
            .count();
        assert_eq!(paid, 2);

        let w = &db.withdrawals_for_user(7).unwrap()[0];
        assert_eq!(w.status, WithdrawalStatus::Completed);
        assert!(w.processed_at.is_some());
    }

    #[test]
    fn withdrawal_claim_cannot_exceed_ready_count() {
        let db = db();
        seed_ready(&db, 7, &["+2348100000001"]);
        let err = db
            .create_withdrawal(7, "9131085651 OPay Bashir Rabiu", 2)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(db.withdrawals_for_user(7).unwrap().is_empty());
    }

    #[test]
    fn acquisition_then_admin_lifecycle_round_trip() {
        let db = db();
        db.create_account(9, Some("seller"), "+2348167757987").unwrap();
        db.update_account_status("+2348167757987", AccountStatus::Accepted, Some("s"), Some(42))
            .unwrap();
        db.update_account_status("+2348167757987", AccountStatus::Verified, None, None)
            .unwrap();
        assert!(db.mark_accounts_paid(9, 1).unwrap());

        let row = db.account_by_phone("+2348167757987").unwrap().unwrap();
        assert_eq!(row.status, AccountStatus::Paid);
        assert_eq!(row.phone_number, "+2348167757987");
    }

    #[test]
    fn forward_audit_log_is_append_only_per_phone() {
        let db = db();
        db.record_forward("+2348167757987", 42, "Your code is 12345")
            .unwrap();
        db.record_forward("+2348167757987", 42, "Your code is 67890")
            .unwrap();

        let rows = db.forwards_for_phone("+2348167757987").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].otp_message, "Your code is 12345");
        assert_eq!(rows[1].buyer_id, 42);
        assert!(db.forwards_for_phone("+2348000000000").unwrap().is_empty());
    }

    #[test]
    fn settings_upsert_round_trip() {
        let db = db();
        assert_eq!(db.get_setting("motd").unwrap(), None);
        db.set_setting("motd", "hello").unwrap();
        db.set_setting("motd", "world").unwrap();
        assert_eq!(db.get_setting("motd").unwrap().as_deref(), Some("world"));
    }

    #[test]
    fn status_counts_groups_by_status() {
        let db = db();
        seed_ready(&db, 1, &["+2348100000001", "+2348100000002"]);
        db.create_account(1, None, "+2348100000003").unwrap();

        let counts = db.status_counts().unwrap();
        let get = |s: AccountStatus| {
            counts
                .iter()
                .find(|(st, _)| *st == s)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };
        assert_eq!(get(AccountStatus::Accepted), 2);
        assert_eq!(get(AccountStatus::Pending), 1);
        assert_eq!(get(AccountStatus::Paid), 0);
    }
}
