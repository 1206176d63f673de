pub mod conversation_service;
pub mod fanout;
pub mod message_service;
pub mod presence;

pub use conversation_service::ConversationService;
pub use fanout::{FanoutReport, FanoutService};
pub use message_service::{HistoryQuery, MessageService, SendMessage, SyncBatch};
pub use presence::PresenceTracker;
