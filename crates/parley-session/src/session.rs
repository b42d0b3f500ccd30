use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Duration, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use parley_core::chat::ChatItem;
use parley_core::envelope::{DecodedEnvelope, Projection};
use parley_core::events::SessionEvent;
use parley_core::ids::{ParticipantId, SessionId};
use parley_stream::fragmenter::DEFAULT_MAX_PAYLOAD;
use parley_stream::{Fragmenter, IngestOutcome, Reassembler, DEFAULT_REASSEMBLY_TIMEOUT};

use crate::error::SessionError;
use crate::handler::{ActionHandler, FrameSink};
use crate::transcript::Transcript;

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How long an incomplete inbound message may buffer before eviction.
    pub reassembly_timeout: Duration,
    /// Broadcast capacity; lagging subscribers miss events rather than
    /// blocking the drive loop.
    pub event_capacity: usize,
    /// Inbound frame queue depth between the transport callback and the
    /// drive loop.
    pub frame_queue: usize,
    /// Fragment size limit for the outbound direction.
    pub max_outbound_payload: usize,
    /// Stream id stamped on locally published messages.
    pub local_participant: ParticipantId,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            event_capacity: 256,
            frame_queue: 1024,
            max_outbound_payload: DEFAULT_MAX_PAYLOAD,
            local_participant: ParticipantId::new(),
        }
    }
}

/// One inbound frame as delivered by the transport's data-message callback.
#[derive(Clone, Debug)]
pub struct InboundFrame {
    pub sender: ParticipantId,
    pub payload: Bytes,
}

/// Per-participant bookkeeping, exposed through [`Session::participants`].
#[derive(Clone, Debug, Default)]
pub struct ParticipantState {
    pub frames_received: u64,
}

/// One realtime chat session: routes inbound frames to per-participant
/// reassemblers, fans out typed events, maintains the transcript, and
/// publishes local input through the injected sink.
///
/// Constructed explicitly and torn down with [`Session::close`] (or drop);
/// nothing here is process-global, so tests and multi-session hosts can run
/// any number of instances side by side.
pub struct Session {
    id: SessionId,
    frame_tx: mpsc::Sender<InboundFrame>,
    event_tx: broadcast::Sender<SessionEvent>,
    transcript: Arc<Transcript>,
    participants: Arc<DashMap<ParticipantId, ParticipantState>>,
    fragmenter: Fragmenter,
    local_participant: ParticipantId,
    sink: Option<Arc<dyn FrameSink>>,
    cancel: CancellationToken,
    _drive: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Open a session. Must be called from within a Tokio runtime; the
    /// drive loop is spawned immediately and runs until [`Session::close`].
    pub fn open(
        config: SessionConfig,
        handler: Arc<dyn ActionHandler>,
        sink: Option<Arc<dyn FrameSink>>,
    ) -> Self {
        let id = SessionId::new();
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue);
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let transcript = Arc::new(Transcript::new());
        let participants = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        let drive = DriveState {
            session_id: id.clone(),
            timeout: config.reassembly_timeout,
            reassemblers: HashMap::new(),
            transcript: Arc::clone(&transcript),
            participants: Arc::clone(&participants),
            event_tx: event_tx.clone(),
            handler,
            cancel: cancel.clone(),
        };
        let drive = tokio::spawn(drive.run(frame_rx));

        tracing::info!(session_id = %id, "session opened");

        Self {
            id,
            frame_tx,
            event_tx,
            transcript,
            participants,
            fragmenter: Fragmenter::new(config.max_outbound_payload),
            local_participant: config.local_participant,
            sink,
            cancel,
            _drive: drive,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Sender the transport callback pushes raw frames into.
    pub fn frame_sender(&self) -> mpsc::Sender<InboundFrame> {
        self.frame_tx.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Session events as a `Stream`.
    pub fn event_stream(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Owned copy of the chat history.
    pub fn transcript(&self) -> Vec<ChatItem> {
        self.transcript.snapshot()
    }

    pub fn clear_transcript(&self) {
        self.transcript.clear();
    }

    /// Participants seen so far, with per-participant frame counts.
    pub fn participants(&self) -> Vec<(ParticipantId, ParticipantState)> {
        self.participants
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Publish locally typed input: one final user envelope, fragmented
    /// onto the wire, and echoed into the local transcript without waiting
    /// for a network roundtrip.
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let sink = self.sink.as_ref().ok_or(SessionError::NoSink)?;

        let envelope = DecodedEnvelope::user_text(
            text,
            &self.local_participant,
            Utc::now().timestamp_millis(),
        );
        for frame in self.fragmenter.fragment(&envelope) {
            sink.send_frame(frame).await?;
        }

        if let Ok(Projection::Chat(item)) = envelope.project() {
            self.transcript.apply(item.clone());
            let _ = self.event_tx.send(SessionEvent::Chat { item });
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the drive loop. Subscribers receive a final `Closed` event.
    pub fn close(&self) {
        tracing::info!(session_id = %self.id, "session closing");
        self.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct DriveState {
    session_id: SessionId,
    timeout: Duration,
    reassemblers: HashMap<ParticipantId, Reassembler>,
    transcript: Arc<Transcript>,
    participants: Arc<DashMap<ParticipantId, ParticipantState>>,
    event_tx: broadcast::Sender<SessionEvent>,
    handler: Arc<dyn ActionHandler>,
    cancel: CancellationToken,
}

impl DriveState {
    /// Single task that owns every reassembler: frames are processed one at
    /// a time, so per-message state never needs locking.
    async fn run(mut self, mut frame_rx: mpsc::Receiver<InboundFrame>) {
        let cancel = self.cancel.clone();
        loop {
            let next_deadline = self
                .reassemblers
                .values()
                .filter_map(Reassembler::next_deadline)
                .min();

            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frame_rx.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => break,
                },
                _ = deadline_sleep(next_deadline) => {
                    let now = Instant::now();
                    for reassembler in self.reassemblers.values_mut() {
                        reassembler.evict_expired(now);
                    }
                }
            }
        }

        tracing::debug!(session_id = %self.session_id, "drive loop stopped");
        self.send_event(SessionEvent::Closed);
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        if !self.participants.contains_key(&frame.sender) {
            self.participants
                .insert(frame.sender.clone(), ParticipantState::default());
            self.send_event(SessionEvent::ParticipantJoined {
                participant: frame.sender.clone(),
            });
        }
        if let Some(mut state) = self.participants.get_mut(&frame.sender) {
            state.frames_received += 1;
        }

        let reassembler = self
            .reassemblers
            .entry(frame.sender.clone())
            .or_insert_with(|| Reassembler::new(self.timeout));

        match reassembler.ingest(&frame.payload) {
            Some(IngestOutcome::Chat(item)) => {
                self.transcript.apply(item.clone());
                self.send_event(SessionEvent::Chat { item });
            }
            Some(IngestOutcome::Action(action)) => self.handler.handle(action),
            Some(IngestOutcome::Failed { message_id, error }) => {
                self.send_event(SessionEvent::DecodeFailed {
                    message_id,
                    reason: error.to_string(),
                });
            }
            Some(IngestOutcome::Suppressed) | None => {}
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("no event receivers, event dropped");
        }
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
