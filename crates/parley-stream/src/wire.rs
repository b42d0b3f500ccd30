use bytes::Bytes;

use parley_core::errors::HeaderError;

/// Sentinel for "fragment count not yet known".
pub const UNKNOWN_TOTAL: &str = "???";

/// Declared fragment count of a logical message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TotalParts {
    Known(u32),
    /// The sender has not determined the final count. Such frames carry no
    /// usable state; a later fragment of the same message declares the
    /// count.
    Unknown,
}

/// One physical frame:
/// `<message_id>|<part_index>|<total_parts_or_"???">|<content>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub message_id: String,
    pub part_index: u32,
    pub total_parts: TotalParts,
    pub content: String,
}

impl Fragment {
    /// Parse a wire frame. Frame bytes are read one byte per character
    /// (Latin-1), never as UTF-8 at this stage: multi-byte text only exists
    /// inside the base64 payload, which is pure ASCII. Content may contain
    /// further `|` characters; only the first three delimit the header.
    pub fn parse(frame: &[u8]) -> Result<Self, HeaderError> {
        let ascii: String = frame.iter().map(|&b| b as char).collect();
        let fields: Vec<&str> = ascii.splitn(4, '|').collect();
        if fields.len() != 4 {
            return Err(HeaderError::FieldCount(fields.len()));
        }

        let part_index = fields[1]
            .parse::<u32>()
            .map_err(|_| HeaderError::BadPartIndex(fields[1].to_owned()))?;

        let total_parts = if fields[2] == UNKNOWN_TOTAL {
            TotalParts::Unknown
        } else {
            fields[2]
                .parse::<u32>()
                .map(TotalParts::Known)
                .map_err(|_| HeaderError::BadTotalParts(fields[2].to_owned()))?
        };

        Ok(Self {
            message_id: fields[0].to_owned(),
            part_index,
            total_parts,
            content: fields[3].to_owned(),
        })
    }

    /// Encode for the outbound direction.
    pub fn encode(&self) -> Bytes {
        let total = match self.total_parts {
            TotalParts::Known(n) => n.to_string(),
            TotalParts::Unknown => UNKNOWN_TOTAL.to_owned(),
        };
        Bytes::from(format!(
            "{}|{}|{}|{}",
            self.message_id, self.part_index, total, self.content
        ))
    }
}
