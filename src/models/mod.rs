pub mod conversation;
pub mod member;
pub mod message;

pub use conversation::{
    direct_conversation_id, Conversation, ConversationFilter, ConversationKind,
    ConversationWithMembers, LastMessagePreview,
};
pub use member::{JoinRequest, MemberPermissions, MemberRole, Membership};
pub use message::{
    Attachment, Message, MessageContent, MessageType, MessageView, NewMessage, ReactionEntry,
    ReceiptStatus, RecipientState, ReplyPreview,
};
