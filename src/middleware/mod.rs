pub mod error_handling;
pub mod guards;

pub use error_handling::ErrorEnvelopeMiddleware;
pub use guards::{ConversationParticipant, User};
