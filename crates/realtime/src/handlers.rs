//! Per-event handler registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use worldbest_protocol::envelope::{MessageType, WebSocketMessage};

/// Callback invoked for every inbound message of a subscribed type.
pub type EventHandler = Arc<dyn Fn(&WebSocketMessage) + Send + Sync>;

/// Identifies one registration, for [`HandlerRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handlers keyed by event name. Survives reconnects.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageType, Vec<(HandlerId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, event: MessageType, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        map.entry(event).or_default().push((id, handler));
        id
    }

    /// Removes one handler, or every handler for `event` when `id` is
    /// `None`. Returns `true` if anything was removed.
    pub(crate) fn remove(&self, event: &MessageType, id: Option<HandlerId>) -> bool {
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        match id {
            None => map.remove(event).is_some_and(|list| !list.is_empty()),
            Some(id) => {
                let Some(list) = map.get_mut(event) else {
                    return false;
                };
                let before = list.len();
                list.retain(|(h, _)| *h != id);
                let removed = list.len() != before;
                if list.is_empty() {
                    map.remove(event);
                }
                removed
            }
        }
    }

    /// Invokes every handler registered for the message's type, in
    /// registration order. Handlers run outside the lock, so they may
    /// register or remove handlers themselves.
    pub(crate) fn dispatch(&self, msg: &WebSocketMessage) -> usize {
        let targets: Vec<EventHandler> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match map.get(&msg.msg_type) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => Vec::new(),
            }
        };
        if targets.is_empty() {
            trace!(msg_type = %msg.msg_type, "no handlers for event");
        }
        for handler in &targets {
            handler(msg);
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let make = move |tag: &str| -> EventHandler {
            let l = l.clone();
            let tag = tag.to_string();
            Arc::new(move |_msg: &WebSocketMessage| l.lock().unwrap().push(tag.clone()))
        };
        (log, make)
    }

    fn msg(t: &str) -> WebSocketMessage {
        WebSocketMessage::new(t, serde_json::Value::Null)
    }

    #[test]
    fn dispatch_reaches_matching_handlers_in_order() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.add(MessageType::Notification, make("a"));
        registry.add(MessageType::Notification, make("b"));
        registry.add(MessageType::Alert, make("c"));

        assert_eq!(registry.dispatch(&msg("notification")), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn custom_event_names_match() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.add(MessageType::from("chapter_locked"), make("x"));

        registry.dispatch(&msg("chapter_locked"));
        assert_eq!(*log.lock().unwrap(), vec!["x"]);
    }

    #[test]
    fn remove_single_handler() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        let a = registry.add(MessageType::Alert, make("a"));
        registry.add(MessageType::Alert, make("b"));

        assert!(registry.remove(&MessageType::Alert, Some(a)));
        assert!(!registry.remove(&MessageType::Alert, Some(a)));
        registry.dispatch(&msg("alert"));
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn remove_all_handlers_for_event() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.add(MessageType::Alert, make("a"));
        registry.add(MessageType::Alert, make("b"));
        registry.add(MessageType::Notification, make("n"));

        assert!(registry.remove(&MessageType::Alert, None));
        assert!(!registry.remove(&MessageType::Alert, None));
        registry.dispatch(&msg("alert"));
        registry.dispatch(&msg("notification"));
        assert_eq!(*log.lock().unwrap(), vec!["n"]);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let registry = Arc::new(HandlerRegistry::new());
        let hits = Arc::new(Mutex::new(0));
        let id_slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let r = registry.clone();
        let h = hits.clone();
        let slot = id_slot.clone();
        let id = registry.add(
            MessageType::Alert,
            Arc::new(move |_: &WebSocketMessage| {
                *h.lock().unwrap() += 1;
                if let Some(id) = *slot.lock().unwrap() {
                    r.remove(&MessageType::Alert, Some(id));
                }
            }),
        );
        *id_slot.lock().unwrap() = Some(id);

        registry.dispatch(&msg("alert"));
        registry.dispatch(&msg("alert"));
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
