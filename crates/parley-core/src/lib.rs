pub mod chat;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;

pub use chat::{ChatItem, MessageKind, Role};
pub use envelope::{DecodedEnvelope, Projection};
pub use errors::{DecodeError, HeaderError};
pub use events::{ExternalAction, SessionEvent};
