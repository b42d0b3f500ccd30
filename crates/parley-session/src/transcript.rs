use parking_lot::RwLock;

use parley_core::chat::ChatItem;

/// Chat history with streaming upsert semantics. While a participant's
/// message is still streaming (non-final), each delivery amends the open
/// item's text and time in place; the final delivery replaces the item
/// wholesale; everything else appends.
#[derive(Debug, Default)]
pub struct Transcript {
    items: RwLock<Vec<ChatItem>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded chat item.
    pub fn apply(&self, incoming: ChatItem) {
        let mut items = self.items.write();
        let open = items.iter().position(|item| {
            item.participant == incoming.participant
                && item.role == incoming.role
                && !item.is_final
        });
        match open {
            Some(idx) if incoming.is_final => items[idx] = incoming,
            Some(idx) => {
                items[idx].text = incoming.text;
                items[idx].time = incoming.time;
            }
            None => items.push(incoming),
        }
    }

    /// Owned copy of the current history.
    pub fn snapshot(&self) -> Vec<ChatItem> {
        self.items.read().clone()
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
