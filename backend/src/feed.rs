use chrono::Utc;
use shared::{NarrationEvent, NarrationKind};

pub type EventId = u64;

/// Append-only log of narration, conversation and placeholder entries.
///
/// Stored oldest-first; [`NarrationFeed::newest_first`] gives presentation order.
/// A `Loading` placeholder can be swapped for its resolving event in place so the
/// reply keeps the slot the placeholder occupied.
#[derive(Debug, Default, Clone)]
pub struct NarrationFeed {
    events: Vec<NarrationEvent>,
    next_id: EventId,
}

impl NarrationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        kind: NarrationKind,
        message: impl Into<String>,
        related_user_message: Option<String>,
    ) -> EventId {
        self.next_id += 1;
        let id = self.next_id;
        self.events.push(NarrationEvent {
            id,
            timestamp: Utc::now(),
            message: message.into(),
            kind,
            related_user_message,
        });
        id
    }

    /// Replace the event `id` with a new one in the same slot.
    /// Returns the id of the replacement, or `None` when `id` is gone.
    pub fn replace(
        &mut self,
        id: EventId,
        kind: NarrationKind,
        message: impl Into<String>,
        related_user_message: Option<String>,
    ) -> Option<EventId> {
        let slot = self.events.iter().position(|event| event.id == id)?;
        self.next_id += 1;
        let new_id = self.next_id;
        self.events[slot] = NarrationEvent {
            id: new_id,
            timestamp: Utc::now(),
            message: message.into(),
            kind,
            related_user_message,
        };
        Some(new_id)
    }

    pub fn remove(&mut self, id: EventId) -> Option<NarrationEvent> {
        let slot = self.events.iter().position(|event| event.id == id)?;
        Some(self.events.remove(slot))
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn get(&self, id: EventId) -> Option<&NarrationEvent> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &NarrationEvent> {
        self.events.iter().rev()
    }

    pub fn snapshot(&self) -> Vec<NarrationEvent> {
        self.newest_first().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_order_is_newest_first() {
        let mut feed = NarrationFeed::new();
        feed.push(NarrationKind::Narrative, "first", None);
        feed.push(NarrationKind::Narrative, "second", None);
        let messages: Vec<_> = feed.newest_first().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["second", "first"]);
    }

    #[test]
    fn replace_keeps_the_placeholder_slot() {
        let mut feed = NarrationFeed::new();
        feed.push(NarrationKind::UserInput, "question", Some("question".into()));
        let loading = feed.push(NarrationKind::Loading, "thinking", None);
        feed.push(NarrationKind::Narrative, "later narration", None);

        let reply = feed
            .replace(loading, NarrationKind::Conversation, "answer", Some("question".into()))
            .expect("placeholder present");

        let kinds: Vec<_> = feed.newest_first().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [NarrationKind::Narrative, NarrationKind::Conversation, NarrationKind::UserInput]
        );
        assert!(feed.get(loading).is_none());
        assert_eq!(feed.get(reply).map(|e| e.message.as_str()), Some("answer"));
    }

    #[test]
    fn replace_of_missing_event_is_a_no_op() {
        let mut feed = NarrationFeed::new();
        let id = feed.push(NarrationKind::Loading, "thinking", None);
        feed.clear();
        assert_eq!(feed.replace(id, NarrationKind::Conversation, "late", None), None);
        assert!(feed.is_empty());
    }

    #[test]
    fn ids_are_never_reused_after_clear() {
        let mut feed = NarrationFeed::new();
        let a = feed.push(NarrationKind::Narrative, "a", None);
        feed.clear();
        let b = feed.push(NarrationKind::Narrative, "b", None);
        assert!(b > a);
    }
}
