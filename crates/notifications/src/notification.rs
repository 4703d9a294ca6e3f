use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leasehold_core::{NotificationId, UserId};

/// What a notification is about. One kind per handled event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentSucceeded,
    PaymentOverdue,
    LeaseSigned,
    LegislationUpdated,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        NotificationKind::PaymentSucceeded,
        NotificationKind::PaymentOverdue,
        NotificationKind::LeaseSigned,
        NotificationKind::LegislationUpdated,
    ];

    /// Outbox event type this kind is raised from.
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationKind::PaymentSucceeded => "Payment.Succeeded",
            NotificationKind::PaymentOverdue => "Payment.Overdue",
            NotificationKind::LeaseSigned => "Lease.Signed",
            NotificationKind::LegislationUpdated => "Legislation.Updated",
        }
    }

    pub fn default_title(&self) -> &'static str {
        match self {
            NotificationKind::PaymentSucceeded => "Payment received",
            NotificationKind::PaymentOverdue => "Payment overdue",
            NotificationKind::LeaseSigned => "Lease signed",
            NotificationKind::LegislationUpdated => "Rental legislation updated",
        }
    }

    pub fn default_body(&self) -> &'static str {
        match self {
            NotificationKind::PaymentSucceeded => "Your rent payment has been received.",
            NotificationKind::PaymentOverdue => "A rent payment is past its due date.",
            NotificationKind::LeaseSigned => "All parties have signed the lease.",
            NotificationKind::LegislationUpdated => {
                "Rules affecting one of your properties have changed."
            }
        }
    }
}

/// A message shown to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            recipient_id,
            kind,
            title: title.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}
