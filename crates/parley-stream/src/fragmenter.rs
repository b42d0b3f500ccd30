use bytes::Bytes;

use parley_core::envelope::DecodedEnvelope;
use parley_core::ids::MessageId;

use crate::wire::{Fragment, TotalParts};

/// Upper bound on fragment content length, chosen so locally typed input
/// fits one frame on transports with ~1 KiB data-message limits.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// Outbound half of the wire format: wraps an envelope and splits its
/// base64 payload into frames the reassembler on the far side can rebuild.
/// Typed local input is short, so the common emission is the single-frame
/// `<id>|0|1|<payload>` form.
#[derive(Clone, Debug)]
pub struct Fragmenter {
    max_payload: usize,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Fragmenter {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.max(1),
        }
    }

    /// Fragment an envelope under a freshly generated message id.
    pub fn fragment(&self, envelope: &DecodedEnvelope) -> Vec<Bytes> {
        self.fragment_with_id(&MessageId::new(), envelope)
    }

    /// Fragment an envelope under a caller-chosen message id.
    pub fn fragment_with_id(
        &self,
        message_id: &MessageId,
        envelope: &DecodedEnvelope,
    ) -> Vec<Bytes> {
        let payload = envelope.encode();
        // The payload is base64, hence ASCII; byte chunks are char-safe.
        let chunks: Vec<&[u8]> = payload.as_bytes().chunks(self.max_payload).collect();
        let total = chunks.len() as u32;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                Fragment {
                    message_id: message_id.as_str().to_owned(),
                    part_index: i as u32,
                    total_parts: TotalParts::Known(total),
                    content: String::from_utf8_lossy(chunk).into_owned(),
                }
                .encode()
            })
            .collect()
    }
}
