pub mod conversation;
pub mod message;
pub mod read_state;
pub mod safety;

pub use conversation::{Conversation, ConversationPosition, ConversationSummary};
pub use message::{ContentType, Message, MessagePosition, NewMessage};
pub use read_state::ReadState;
pub use safety::{NewReport, Report, ReportReason, ReportStatus};
