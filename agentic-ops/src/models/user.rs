use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A wallet owner whose agents write to the message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Lowercased 0x-prefixed wallet address
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
}
