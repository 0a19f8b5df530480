//! Row types mapping directly to SQLite rows, kept distinct from the wire
//! shapes the handlers build for users.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};

use crate::domain::{AccountStatus, WithdrawalStatus};
use crate::Error;

pub struct AccountRow {
    pub id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub phone_number: String,
    pub status: AccountStatus,
    pub session_ref: Option<String>,
    pub buyer_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct WithdrawalRow {
    pub id: i64,
    pub user_id: i64,
    pub bank_details: String,
    pub account_count: i64,
    pub status: WithdrawalStatus,
    pub created_at: String,
    pub processed_at: Option<String>,
}

pub struct OtpForwardRow {
    pub id: i64,
    pub phone_number: String,
    pub buyer_id: i64,
    pub otp_message: String,
    pub forwarded_at: String,
}

impl FromSql for AccountStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        AccountStatus::parse(s).ok_or_else(|| {
            FromSqlError::Other(Box::new(Error::Validation(format!(
                "unknown account status: {s}"
            ))))
        })
    }
}

impl FromSql for WithdrawalStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        WithdrawalStatus::parse(s).ok_or_else(|| {
            FromSqlError::Other(Box::new(Error::Validation(format!(
                "unknown withdrawal status: {s}"
            ))))
        })
    }
}
