pub mod agent;
pub mod message;
pub mod user;

pub use agent::Agent;
pub use message::{Message, MessageRole, MessageStats};
pub use user::User;
