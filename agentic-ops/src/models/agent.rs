use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An agent address operating a user's wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub user_id: i64,
    pub agent_address: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}
