/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a bot-API message (for edits and pins).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Sender id Telegram uses for its own service notifications (login codes).
pub const TELEGRAM_SYSTEM_SENDER: i64 = 777_000;

/// Lifecycle of a submitted account.
///
/// `pending -> accepted -> verified -> paid`, with `rejected` as a terminal
/// alternative reachable from any pre-paid state. Rows are never deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    Pending,
    Accepted,
    Verified,
    Paid,
    Rejected,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Accepted => "accepted",
            AccountStatus::Verified => "verified",
            AccountStatus::Paid => "paid",
            AccountStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AccountStatus::Pending),
            "accepted" => Some(AccountStatus::Accepted),
            "verified" => Some(AccountStatus::Verified),
            "paid" => Some(AccountStatus::Paid),
            "rejected" => Some(AccountStatus::Rejected),
            _ => None,
        }
    }

    /// Accounts in these states count toward a seller's payout.
    pub fn is_payment_ready(self) -> bool {
        matches!(self, AccountStatus::Accepted | AccountStatus::Verified)
    }
}

/// Lifecycle of a withdrawal request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WithdrawalStatus {
    Pending,
    Completed,
}

impl WithdrawalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WithdrawalStatus::Pending),
            "completed" => Some(WithdrawalStatus::Completed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_status_round_trips() {
        for status in [
            AccountStatus::Pending,
            AccountStatus::Accepted,
            AccountStatus::Verified,
            AccountStatus::Paid,
            AccountStatus::Rejected,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::parse("bogus"), None);
    }

    #[test]
    fn only_accepted_and_verified_are_payment_ready() {
        assert!(AccountStatus::Accepted.is_payment_ready());
        assert!(AccountStatus::Verified.is_payment_ready());
        assert!(!AccountStatus::Pending.is_payment_ready());
        assert!(!AccountStatus::Paid.is_payment_ready());
        assert!(!AccountStatus::Rejected.is_payment_ready());
    }
}
