//! Conversation log maintenance.
//!
//! The log is unique by `_id` and ordered by `ts` ascending. Every mutation
//! runs inside a single [`Store::update`] so it commits together with the
//! unread counter.

use tracing::debug;

use crate::store::{Message, SessionState, Store};

/// Insert `message`, or replace the entry with the same `_id` in place, then
/// stably reorder by `ts` and recompute the unread counter.
pub async fn upsert(store: &Store, message: Message) {
    store
        .update(|state| {
            upsert_into(&mut state.messages, message);
            recompute_unread(state);
        })
        .await;
}

/// Upsert several messages in one state commit.
pub async fn upsert_many(store: &Store, messages: Vec<Message>) {
    if messages.is_empty() {
        return;
    }
    store
        .update(|state| {
            for message in messages {
                upsert_into(&mut state.messages, message);
            }
            recompute_unread(state);
        })
        .await;
}

/// Drop the message with `message_id`; an unknown id leaves the log as is.
pub async fn remove(store: &Store, message_id: &str) {
    store
        .update(|state| {
            let before = state.messages.len();
            state.messages.retain(|m| m.id != message_id);
            if state.messages.len() != before {
                debug!(message_id, "messages: removed");
            }
        })
        .await;
}

/// Replace-or-append by id, then stable sort by timestamp.
pub fn upsert_into(messages: &mut Vec<Message>, message: Message) {
    match messages.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => *existing = message,
        None => messages.push(message),
    }
    messages.sort_by_key(|m| m.ts);
}

/// Recompute `unread` while the widget is minimized or hidden.
///
/// Counts messages after `last_read_message_id`; when that id is absent or
/// no longer in the log, every message counts as unread.
pub fn recompute_unread(state: &mut SessionState) {
    if !state.minimized && state.visible {
        return;
    }
    let read_upto = state
        .last_read_message_id
        .as_deref()
        .and_then(|id| state.messages.iter().position(|m| m.id == id));
    state.unread = match read_upto {
        Some(idx) => state.messages.len() - idx - 1,
        None => state.messages.len(),
    };
}

/// Mark everything currently in the log as read.
pub async fn mark_read(store: &Store) {
    store
        .update(|state| {
            state.last_read_message_id = state.messages.last().map(|m| m.id.clone());
            state.unread = 0;
        })
        .await;
}
