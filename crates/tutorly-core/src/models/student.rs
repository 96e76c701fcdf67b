//! Student billing profile: the slice of the student record the
//! scheduling engine reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub group_id: Option<Uuid>,
    /// Prepaid sessions left. May go negative when sessions are logged
    /// after the pack ran out.
    pub remaining_sessions: i32,
    pub auto_invoice: bool,
    /// Sessions per auto-generated invoice. Zero disables auto-invoicing.
    pub default_pack_size: u32,
    pub rate_cents: i64,
    /// When set in the future, auto invoices are held until this instant.
    pub scheduled_invoice_send_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStudent {
    pub name: String,
    pub group_id: Option<Uuid>,
    pub remaining_sessions: i32,
    pub auto_invoice: bool,
    pub default_pack_size: u32,
    pub rate_cents: i64,
    pub scheduled_invoice_send_at: Option<DateTime<Utc>>,
}

/// Before/after view of a balance write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub previous: i32,
    pub current: i32,
}

impl BalanceChange {
    /// A depletion crossing: positive before, zero-or-below after.
    pub fn is_depletion(&self) -> bool {
        self.previous > 0 && self.current <= 0
    }
}
