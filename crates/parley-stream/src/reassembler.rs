use std::cmp::Reverse;
use std::collections::{BinaryHeap, BTreeMap, HashMap};

use tokio::time::{Duration, Instant};

use parley_core::chat::ChatItem;
use parley_core::envelope::{DecodedEnvelope, Projection};
use parley_core::errors::DecodeError;
use parley_core::events::ExternalAction;

use crate::wire::{Fragment, TotalParts};

/// How long an incomplete message may sit in the cache before eviction.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Result of feeding one frame to the reassembler. `None` means the frame
/// contributed (or was dropped) without completing a message.
#[derive(Clone, Debug)]
pub enum IngestOutcome {
    /// A message completed and decoded into a visible chat item.
    Chat(ChatItem),
    /// A message completed into a side-channel action; no chat item.
    Action(ExternalAction),
    /// A message completed and decoded, but its display text was empty.
    Suppressed,
    /// All fragments arrived but the joined payload failed to decode.
    Failed {
        message_id: String,
        error: DecodeError,
    },
}

/// Reassembly state for one in-flight logical message. Owned exclusively by
/// the reassembler; fragments are keyed by part index so a duplicate index
/// overwrites rather than double-counts.
struct PendingMessage {
    parts: BTreeMap<u32, String>,
    total_parts: u32,
    generation: u64,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: Instant,
    generation: u64,
    message_id: String,
}

/// Reorders and joins chunked text-stream frames into decoded messages.
///
/// Frames for different message ids are independent and may interleave
/// arbitrarily; frames within one message may arrive in any order. A message
/// completes once `total_parts` distinct indices are present, at which point
/// the contents are joined in index order and the *joined* string is decoded
/// (base64, then UTF-8, then JSON), never fragment by fragment.
///
/// Single-threaded by design: `ingest` never suspends, so a hosting event
/// loop can call it once per inbound frame without locking. Expired entries
/// are evicted on each `ingest` call and whenever the host drains
/// [`Reassembler::evict_expired`] after sleeping until
/// [`Reassembler::next_deadline`].
pub struct Reassembler {
    timeout: Duration,
    cache: HashMap<String, PendingMessage>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_generation: u64,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TIMEOUT)
    }
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cache: HashMap::new(),
            timers: BinaryHeap::new(),
            next_generation: 0,
        }
    }

    /// Number of messages currently buffering.
    pub fn pending_count(&self) -> usize {
        self.cache.len()
    }

    /// Earliest deadline among scheduled evictions. Stale entries for
    /// already-completed messages may surface here; draining them via
    /// [`Reassembler::evict_expired`] is a no-op.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Feed one inbound frame.
    pub fn ingest(&mut self, frame: &[u8]) -> Option<IngestOutcome> {
        let now = Instant::now();
        self.evict_expired(now);

        let fragment = match Fragment::parse(frame) {
            Ok(fragment) => fragment,
            Err(err) => {
                tracing::debug!(kind = err.error_kind(), "dropping frame with malformed header");
                return None;
            }
        };

        let total_parts = match fragment.total_parts {
            TotalParts::Known(n) => n,
            TotalParts::Unknown => {
                tracing::debug!(
                    message_id = %fragment.message_id,
                    "total parts unknown, waiting for a counted fragment"
                );
                return None;
            }
        };

        if !self.cache.contains_key(&fragment.message_id) {
            let generation = self.next_generation;
            self.next_generation += 1;
            self.timers.push(Reverse(TimerEntry {
                deadline: now + self.timeout,
                generation,
                message_id: fragment.message_id.clone(),
            }));
            self.cache.insert(
                fragment.message_id.clone(),
                PendingMessage {
                    parts: BTreeMap::new(),
                    total_parts,
                    generation,
                },
            );
        }

        let pending = self.cache.get_mut(&fragment.message_id)?;
        pending.parts.insert(fragment.part_index, fragment.content);
        if pending.parts.len() as u32 != pending.total_parts {
            return None;
        }

        let pending = self.cache.remove(&fragment.message_id)?;
        Some(self.complete(fragment.message_id, pending))
    }

    /// Evict every pending message whose deadline has passed. Returns the
    /// number of messages discarded. Eviction emits no event; an incomplete
    /// sender is steady-state, not an error.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(Reverse(entry)) = self.timers.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = self.timers.pop() else {
                break;
            };
            // A completed message frees its id for reuse; the stale timer
            // must not evict the successor. Generations disambiguate.
            let live = self
                .cache
                .get(&entry.message_id)
                .is_some_and(|pending| pending.generation == entry.generation);
            if !live {
                continue;
            }
            if let Some(pending) = self.cache.remove(&entry.message_id) {
                tracing::warn!(
                    message_id = %entry.message_id,
                    received = pending.parts.len(),
                    expected = pending.total_parts,
                    "incomplete message discarded"
                );
                evicted += 1;
            }
        }
        evicted
    }

    fn complete(&self, message_id: String, pending: PendingMessage) -> IngestOutcome {
        let joined: String = pending.parts.into_values().collect();
        match DecodedEnvelope::decode(&joined).and_then(|env| env.project()) {
            Ok(Projection::Chat(item)) => {
                tracing::debug!(
                    message_id = %message_id,
                    participant = %item.participant,
                    is_final = item.is_final,
                    "message reassembled"
                );
                IngestOutcome::Chat(item)
            }
            Ok(Projection::Action(action)) => {
                tracing::info!(
                    message_id = %message_id,
                    action = action.action_name(),
                    "message requested external action"
                );
                IngestOutcome::Action(action)
            }
            Ok(Projection::Suppressed) => IngestOutcome::Suppressed,
            Err(error) => {
                tracing::warn!(
                    message_id = %message_id,
                    kind = error.error_kind(),
                    "discarding undecodable message"
                );
                IngestOutcome::Failed { message_id, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use parley_core::chat::MessageKind;

    fn envelope_json(text: &str) -> String {
        format!(
            r#"{{"stream_id":"1001","is_final":true,"text":{},"text_ts":42,"role":"assistant"}}"#,
            serde_json::to_string(text).unwrap()
        )
    }

    /// Split the base64 payload of `json` into `parts` frames for `id`.
    fn frames_for(id: &str, json: &str, parts: usize) -> Vec<Vec<u8>> {
        let payload = BASE64.encode(json);
        let chunk = payload.len().div_ceil(parts);
        payload
            .as_bytes()
            .chunks(chunk)
            .enumerate()
            .map(|(i, c)| {
                let mut frame = format!("{id}|{i}|{parts}|").into_bytes();
                frame.extend_from_slice(c);
                frame
            })
            .collect()
    }

    fn expect_chat(outcome: Option<IngestOutcome>) -> ChatItem {
        match outcome {
            Some(IngestOutcome::Chat(item)) => item,
            other => panic!("expected chat outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_fragment_message_completes() {
        let mut r = Reassembler::default();
        let frames = frames_for("m1", &envelope_json("hello"), 1);
        let item = expect_chat(r.ingest(&frames[0]));
        assert_eq!(item.text, "hello");
        assert_eq!(item.kind, MessageKind::Text);
        assert_eq!(r.pending_count(), 0);
    }

    #[tokio::test]
    async fn fragments_reorder_by_part_index() {
        // Delivery order [2, 0, 1] must reconstruct as [0, 1, 2].
        let mut r = Reassembler::default();
        let frames = frames_for("m1", &envelope_json("out of order text"), 3);
        assert!(r.ingest(&frames[2]).is_none());
        assert!(r.ingest(&frames[0]).is_none());
        let item = expect_chat(r.ingest(&frames[1]));
        assert_eq!(item.text, "out of order text");
    }

    #[tokio::test]
    async fn interleaved_messages_are_independent() {
        let mut r = Reassembler::default();
        let a = frames_for("ma", &envelope_json("first speaker"), 2);
        let b = frames_for("mb", &envelope_json("second speaker"), 2);

        assert!(r.ingest(&a[0]).is_none());
        assert!(r.ingest(&b[1]).is_none());
        assert!(r.ingest(&b[0]).is_some());
        let item = expect_chat(r.ingest(&a[1]));
        assert_eq!(item.text, "first speaker");
    }

    #[tokio::test]
    async fn duplicate_part_index_overwrites() {
        let json = envelope_json("ABCDEF");
        let payload = BASE64.encode(&json);
        let (left, right) = payload.split_at(payload.len() / 2);

        let mut r = Reassembler::default();
        // A stale copy of part 0 arrives first, then the real one.
        assert!(r
            .ingest(format!("m1|0|2|{}", "x".repeat(left.len())).as_bytes())
            .is_none());
        assert!(r.ingest(format!("m1|0|2|{left}").as_bytes()).is_none());
        assert_eq!(r.pending_count(), 1);

        let item = expect_chat(r.ingest(format!("m1|1|2|{right}").as_bytes()));
        assert_eq!(item.text, "ABCDEF");
    }

    #[tokio::test]
    async fn joined_payload_decoded_as_a_whole() {
        // Split at an offset that is not a multiple of 4: each fragment on
        // its own is invalid base64, so this only passes when the contents
        // are joined before decoding.
        let payload = BASE64.encode(envelope_json("join then decode"));
        let (left, right) = payload.split_at(5);

        let mut r = Reassembler::default();
        assert!(r.ingest(format!("m1|0|2|{left}").as_bytes()).is_none());
        let item = expect_chat(r.ingest(format!("m1|1|2|{right}").as_bytes()));
        assert_eq!(item.text, "join then decode");
    }

    #[tokio::test]
    async fn malformed_header_leaves_no_state() {
        let mut r = Reassembler::default();
        assert!(r.ingest(b"m1|zero|2|abc").is_none());
        assert!(r.ingest(b"just text").is_none());
        assert_eq!(r.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_total_retains_nothing() {
        let mut r = Reassembler::default();
        assert!(r.ingest(b"m1|0|???|QQ==").is_none());
        assert_eq!(r.pending_count(), 0);
        assert!(r.next_deadline().is_none());
    }

    #[tokio::test]
    async fn undecodable_message_surfaces_error() {
        let mut r = Reassembler::default();
        let outcome = r.ingest(b"m1|0|1|%%%not-base64%%%");
        match outcome {
            Some(IngestOutcome::Failed { message_id, error }) => {
                assert_eq!(message_id, "m1");
                assert_eq!(error.error_kind(), "base64");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(r.pending_count(), 0);
    }

    #[tokio::test]
    async fn empty_text_is_suppressed() {
        let mut r = Reassembler::default();
        let frames = frames_for("m1", &envelope_json("   "), 1);
        assert!(matches!(
            r.ingest(&frames[0]),
            Some(IngestOutcome::Suppressed)
        ));
    }

    #[tokio::test]
    async fn browse_website_becomes_action() {
        let inner = r#"{"type":"action","data":{"action":"browse_website","data":{"url":"https://example.com"}}}"#;
        let json = format!(
            r#"{{"stream_id":"1","is_final":true,"text":{},"text_ts":1,"role":"assistant","data_type":"raw"}}"#,
            serde_json::to_string(inner).unwrap()
        );
        let mut r = Reassembler::default();
        let frames = frames_for("m1", &json, 2);
        assert!(r.ingest(&frames[0]).is_none());
        match r.ingest(&frames[1]) {
            Some(IngestOutcome::Action(ExternalAction::BrowseWebsite { url })) => {
                assert_eq!(url, "https://example.com");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_message_evicted_after_timeout() {
        let mut r = Reassembler::default();
        let frames = frames_for("m1", &envelope_json("never finishes"), 3);
        assert!(r.ingest(&frames[0]).is_none());
        assert!(r.ingest(&frames[1]).is_none());
        assert_eq!(r.pending_count(), 1);

        tokio::time::advance(Duration::from_millis(5001)).await;
        assert_eq!(r.evict_expired(Instant::now()), 1);
        assert_eq!(r.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn message_id_reusable_after_eviction() {
        let mut r = Reassembler::default();
        let frames = frames_for("m1", &envelope_json("stalled"), 3);
        assert!(r.ingest(&frames[0]).is_none());

        tokio::time::advance(Duration::from_millis(5001)).await;

        // The next frame for the same id starts a fresh message; eviction of
        // the stale entry happens on ingest.
        let fresh = frames_for("m1", &envelope_json("fresh start"), 1);
        let item = expect_chat(r.ingest(&fresh[0]));
        assert_eq!(item.text, "fresh start");
        assert_eq!(r.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_evict_successor() {
        let mut r = Reassembler::default();

        // First use of the id completes immediately.
        let first = frames_for("m1", &envelope_json("quick"), 1);
        assert!(r.ingest(&first[0]).is_some());

        // Second use of the same id starts 3s later and is still incomplete
        // when the first timer's deadline passes.
        tokio::time::advance(Duration::from_millis(3000)).await;
        let second = frames_for("m1", &envelope_json("slow burn"), 2);
        assert!(r.ingest(&second[0]).is_none());

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(r.evict_expired(Instant::now()), 0);
        assert_eq!(r.pending_count(), 1);

        // The successor still completes.
        let item = expect_chat(r.ingest(&second[1]));
        assert_eq!(item.text, "slow burn");
    }

    #[tokio::test(start_paused = true)]
    async fn next_deadline_tracks_earliest_pending() {
        let mut r = Reassembler::default();
        assert!(r.next_deadline().is_none());

        let frames = frames_for("m1", &envelope_json("pending"), 2);
        assert!(r.ingest(&frames[0]).is_none());
        let deadline = r.next_deadline().expect("deadline scheduled");
        assert!(deadline > Instant::now());
        assert!(deadline <= Instant::now() + DEFAULT_REASSEMBLY_TIMEOUT);
    }
}
