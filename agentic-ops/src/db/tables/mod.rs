//! Database model modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for a specific table group.

mod agents;   // agents, agent_message_counters
mod messages; // messages, user_message_counters (+ counter upkeep)
mod users;    // users
