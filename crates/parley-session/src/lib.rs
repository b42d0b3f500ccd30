pub mod error;
pub mod handler;
pub mod session;
pub mod transcript;

pub use error::SessionError;
pub use handler::{ActionHandler, FrameSink, NoopActionHandler};
pub use session::{InboundFrame, ParticipantState, Session, SessionConfig};
pub use transcript::Transcript;
