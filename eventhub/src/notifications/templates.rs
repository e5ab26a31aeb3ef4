//! Customer-facing emails for organizer decisions.

use crate::{db::models::transactions::Transaction, types::Idr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub const ACCEPTED_SUBJECT: &str = "🎉 Payment Accepted - Your Event Ticket is Confirmed!";
pub const REJECTED_SUBJECT: &str = "❌ Payment Rejected - Action Required";

/// Rupiah with `.` as the thousands separator, e.g. `1.250.000`
pub fn format_idr(amount: Idr) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn greeting_name(name: &str) -> &str {
    if name.trim().is_empty() {
        "there"
    } else {
        name
    }
}

pub fn transaction_accepted(customer_name: &str, event_title: &str, transaction: &Transaction) -> RenderedEmail {
    let name = greeting_name(customer_name);
    let total = format_idr(transaction.total_payable_idr);
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #4CAF50;">Payment Accepted!</h2>
  <p>Hi {name},</p>
  <p>Great news! Your payment for <strong>{title}</strong> has been accepted by the organizer.</p>
  <p>Your transaction details:</p>
  <ul>
    <li>Transaction ID: {id}</li>
    <li>Event: {title}</li>
    <li>Total Paid: IDR {total}</li>
  </ul>
  <p>You're all set! Enjoy your event!</p>
  <p>Best regards,<br>EventHub Team</p>
</div>"#,
        name = escape(name),
        title = escape(event_title),
        id = transaction.id,
    );
    let text = format!(
        "Hi {name},\n\n\
         Great news! Your payment for {event_title} has been accepted by the organizer.\n\n\
         Transaction ID: {id}\nEvent: {event_title}\nTotal Paid: IDR {total}\n\n\
         You're all set! Enjoy your event!\n\nBest regards,\nEventHub Team\n",
        id = transaction.id,
    );

    RenderedEmail {
        subject: ACCEPTED_SUBJECT.to_string(),
        html,
        text,
    }
}

pub fn transaction_rejected(customer_name: &str, event_title: &str, transaction: &Transaction) -> RenderedEmail {
    let name = greeting_name(customer_name);
    let total = format_idr(transaction.total_payable_idr);
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #f44336;">Payment Rejected</h2>
  <p>Hi {name},</p>
  <p>Unfortunately, your payment for <strong>{title}</strong> was rejected by the organizer.</p>
  <p>Transaction details:</p>
  <ul>
    <li>Transaction ID: {id}</li>
    <li>Event: {title}</li>
    <li>Amount: IDR {total}</li>
  </ul>
  <p>Your points, vouchers, and coupons have been automatically refunded to your account.</p>
  <p>If you believe this was an error, please contact the event organizer.</p>
  <p>Best regards,<br>EventHub Team</p>
</div>"#,
        name = escape(name),
        title = escape(event_title),
        id = transaction.id,
    );
    let text = format!(
        "Hi {name},\n\n\
         Unfortunately, your payment for {event_title} was rejected by the organizer.\n\n\
         Transaction ID: {id}\nEvent: {event_title}\nAmount: IDR {total}\n\n\
         Your points, vouchers, and coupons have been automatically refunded to your account.\n\
         If you believe this was an error, please contact the event organizer.\n\n\
         Best regards,\nEventHub Team\n",
        id = transaction.id,
    );

    RenderedEmail {
        subject: REJECTED_SUBJECT.to_string(),
        html,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::transactions::TransactionStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn transaction(total: Idr) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            status: TransactionStatus::Done,
            payment_due_at: Utc::now(),
            organizer_decision_by: None,
            subtotal_idr: total,
            discount_voucher_idr: 0,
            discount_coupon_idr: 0,
            points_used: 0,
            total_payable_idr: total,
            used_voucher_id: None,
            used_coupon_id: None,
            discounts_confirmed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn idr_is_grouped_by_thousands() {
        assert_eq!(format_idr(0), "0");
        assert_eq!(format_idr(999), "999");
        assert_eq!(format_idr(200_000), "200.000");
        assert_eq!(format_idr(1_250_000), "1.250.000");
        assert_eq!(format_idr(-5_000), "-5.000");
    }

    #[test]
    fn accepted_email_carries_total_and_escapes_title() {
        let email = transaction_accepted("Sari", "Rock & <Roll>", &transaction(200_000));
        assert_eq!(email.subject, ACCEPTED_SUBJECT);
        assert!(email.html.contains("Rock &amp; &lt;Roll&gt;"));
        assert!(email.html.contains("IDR 200.000"));
        assert!(email.text.contains("Rock & <Roll>"));
    }

    #[test]
    fn rejected_email_mentions_refunds_and_falls_back_on_name() {
        let email = transaction_rejected("  ", "Jazz Night", &transaction(50_000));
        assert_eq!(email.subject, REJECTED_SUBJECT);
        assert!(email.html.contains("Hi there,"));
        assert!(email.text.contains("automatically refunded"));
    }
}
