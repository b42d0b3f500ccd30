use async_trait::async_trait;
use bytes::Bytes;

use parley_core::events::ExternalAction;

use crate::error::SessionError;

/// Side-channel sink for agent-requested effects, e.g. opening a URL in the
/// hosting application. Invoked exactly once per decoded action, from the
/// session's drive loop; implementations must not block.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, action: ExternalAction);
}

/// Drops every action. For headless consumers and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopActionHandler;

impl ActionHandler for NoopActionHandler {
    fn handle(&self, action: ExternalAction) {
        tracing::debug!(action = action.action_name(), "no action handler installed, dropped");
    }
}

/// Outbound seam: where locally produced wire frames go. Implemented over
/// the realtime transport's data-channel publish call.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Bytes) -> Result<(), SessionError>;
}
