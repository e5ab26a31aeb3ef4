//! Allowed moves between transaction statuses.

use crate::db::models::transactions::TransactionStatus;
use std::fmt;

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::WaitingPayment => "WAITING_PAYMENT",
            TransactionStatus::WaitingAdminConfirmation => "WAITING_ADMIN_CONFIRMATION",
            TransactionStatus::Done => "DONE",
            TransactionStatus::Rejected => "REJECTED",
            TransactionStatus::Canceled => "CANCELED",
            TransactionStatus::Expired => "EXPIRED",
        }
    }

    /// Terminal statuses are absorbing
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Done | TransactionStatus::Rejected | TransactionStatus::Canceled | TransactionStatus::Expired
        )
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (WaitingPayment, WaitingAdminConfirmation)
                | (WaitingPayment, Expired)
                | (WaitingPayment, Canceled)
                | (WaitingAdminConfirmation, Done)
                | (WaitingAdminConfirmation, Rejected)
                | (WaitingAdminConfirmation, Canceled)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    const ALL: [TransactionStatus; 6] = [WaitingPayment, WaitingAdminConfirmation, Done, Rejected, Canceled, Expired];

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn waiting_statuses_can_be_canceled() {
        assert!(WaitingPayment.can_transition_to(Canceled));
        assert!(WaitingAdminConfirmation.can_transition_to(Canceled));
        assert!(!WaitingPayment.can_transition_to(Done));
        assert!(!WaitingAdminConfirmation.can_transition_to(Expired));
    }

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(WaitingAdminConfirmation.to_string(), "WAITING_ADMIN_CONFIRMATION");
        assert_eq!(
            serde_json::to_string(&WaitingAdminConfirmation).unwrap(),
            "\"WAITING_ADMIN_CONFIRMATION\""
        );
    }
}
