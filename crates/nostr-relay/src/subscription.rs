use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use nostr_sdk::prelude::*;
use rand_core::{OsRng, RngCore};

use crate::RelayError;

pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;
pub type EoseCallback = Arc<dyn Fn(&[Event]) + Send + Sync>;
pub type ClosedCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Collect stored events, hand them over at EOSE, then forget the subscription.
    Fetch,
    /// Stay open for new events and re-issue the request after every reconnect.
    Live,
}

/// One logical `REQ` registered with a [`crate::RelayClient`].
#[derive(Clone)]
pub struct SubscriptionRequest {
    pub id: String,
    pub filter: Filter,
    pub mode: SubscriptionMode,
    /// Resumption cursor. Live subscriptions move it forward as events arrive.
    pub since: Option<Timestamp>,
    on_event: Option<EventCallback>,
    on_eose: Option<EoseCallback>,
    on_closed: Option<ClosedCallback>,
}

impl SubscriptionRequest {
    pub fn new(filter: Filter, mode: SubscriptionMode) -> Self {
        Self {
            id: generate_subscription_id(),
            filter,
            mode,
            since: None,
            on_event: None,
            on_eose: None,
            on_closed: None,
        }
    }

    pub fn fetch(filter: Filter) -> Self {
        Self::new(filter, SubscriptionMode::Fetch)
    }

    pub fn live(filter: Filter) -> Self {
        Self::new(filter, SubscriptionMode::Live)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn on_event(mut self, callback: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn on_eose(mut self, callback: impl Fn(&[Event]) + Send + Sync + 'static) -> Self {
        self.on_eose = Some(Arc::new(callback));
        self
    }

    pub fn on_closed(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(callback));
        self
    }

    /// A subscription delivers through exactly one of `on_event` or `on_eose`.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.id.is_empty() {
            return Err(RelayError::InvalidSubscription("empty subscription id"));
        }
        match (self.on_event.is_some(), self.on_eose.is_some()) {
            (true, false) | (false, true) => Ok(()),
            (false, false) => Err(RelayError::InvalidSubscription(
                "specify either on_event or on_eose",
            )),
            (true, true) => Err(RelayError::InvalidSubscription(
                "specify only one of on_event or on_eose",
            )),
        }
    }

    /// The filter actually sent to the relay: the cursor replaces the filter's
    /// own `since` when it is newer.
    pub fn effective_filter(&self) -> Filter {
        let mut filter = self.filter.clone();
        if let Some(cursor) = self.since {
            if filter.since.map_or(true, |since| cursor > since) {
                filter.since = Some(cursor);
            }
        }
        filter
    }

    pub(crate) fn event_callback(&self) -> Option<EventCallback> {
        self.on_event.clone()
    }

    pub(crate) fn eose_callback(&self) -> Option<EoseCallback> {
        self.on_eose.clone()
    }

    pub(crate) fn closed_callback(&self) -> Option<ClosedCallback> {
        self.on_closed.clone()
    }
}

impl fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("mode", &self.mode)
            .field("since", &self.since)
            .field("on_event", &self.on_event.is_some())
            .field("on_eose", &self.on_eose.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .finish()
    }
}

/// A registered request plus the events buffered for it so far. Only
/// `on_eose` subscriptions buffer; `on_event` delivery keeps nothing.
pub(crate) struct ActiveSubscription {
    pub(crate) request: SubscriptionRequest,
    pub(crate) events: Vec<Event>,
    // Ids already delivered at exactly the cursor second. A resubscribe asks
    // for `since = cursor`, so the relay sends those again.
    seen_at_cursor: HashSet<EventId>,
}

impl ActiveSubscription {
    pub(crate) fn new(request: SubscriptionRequest) -> Self {
        Self {
            request,
            events: Vec::new(),
            seen_at_cursor: HashSet::new(),
        }
    }

    /// Records a verified event. Returns false for a live-mode redelivery that
    /// was already handed to the caller.
    pub(crate) fn accept(&mut self, event: &Event) -> bool {
        if self.request.mode == SubscriptionMode::Live {
            match self.request.since {
                Some(cursor) if event.created_at < cursor => {}
                Some(cursor) if event.created_at == cursor => {
                    if !self.seen_at_cursor.insert(event.id) {
                        return false;
                    }
                }
                _ => {
                    self.request.since = Some(event.created_at);
                    self.seen_at_cursor.clear();
                    self.seen_at_cursor.insert(event.id);
                }
            }
        }
        if self.request.on_eose.is_some() {
            self.events.push(event.clone());
        }
        true
    }
}

pub fn generate_subscription_id() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_at(keys: &Keys, secs: u64, content: &str) -> Event {
        EventBuilder::text_note(content)
            .custom_created_at(Timestamp::from(secs))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_requires_exactly_one_delivery_callback() {
        let filter = Filter::new().kind(Kind::TextNote);

        let none = SubscriptionRequest::fetch(filter.clone());
        assert!(matches!(
            none.validate(),
            Err(RelayError::InvalidSubscription(_))
        ));

        let both = SubscriptionRequest::fetch(filter.clone())
            .on_event(|_| {})
            .on_eose(|_| {});
        assert!(matches!(
            both.validate(),
            Err(RelayError::InvalidSubscription(_))
        ));

        let closed_only = SubscriptionRequest::live(filter.clone()).on_closed(|_| {});
        assert!(closed_only.validate().is_err());

        assert!(SubscriptionRequest::live(filter.clone())
            .on_event(|_| {})
            .on_closed(|_| {})
            .validate()
            .is_ok());
        assert!(SubscriptionRequest::fetch(filter).on_eose(|_| {}).validate().is_ok());
    }

    #[test]
    fn test_effective_filter_prefers_newer_cursor() {
        let filter = Filter::new().kind(Kind::TextNote).since(Timestamp::from(50));

        let older = SubscriptionRequest::live(filter.clone()).with_since(Timestamp::from(10));
        assert_eq!(older.effective_filter().since, Some(Timestamp::from(50)));

        let newer = SubscriptionRequest::live(filter.clone()).with_since(Timestamp::from(90));
        assert_eq!(newer.effective_filter().since, Some(Timestamp::from(90)));

        let unset = SubscriptionRequest::live(Filter::new()).with_since(Timestamp::from(7));
        assert_eq!(unset.effective_filter().since, Some(Timestamp::from(7)));
    }

    #[test]
    fn test_live_cursor_advances_and_skips_redelivery() {
        let keys = Keys::generate();
        let mut sub = ActiveSubscription::new(
            SubscriptionRequest::live(Filter::new()).on_event(|_| {}),
        );

        let first = note_at(&keys, 100, "first");
        assert!(sub.accept(&first));
        assert_eq!(sub.request.since, Some(Timestamp::from(100)));

        assert!(!sub.accept(&first));

        let same_second = note_at(&keys, 100, "second");
        assert!(sub.accept(&same_second));

        let older = note_at(&keys, 40, "older");
        assert!(sub.accept(&older));
        assert_eq!(sub.request.since, Some(Timestamp::from(100)));

        assert!(sub.events.is_empty());
    }

    #[test]
    fn test_only_eose_subscriptions_buffer() {
        let keys = Keys::generate();
        let mut streaming = ActiveSubscription::new(
            SubscriptionRequest::live(Filter::new()).on_event(|_| {}),
        );
        let mut batched =
            ActiveSubscription::new(SubscriptionRequest::live(Filter::new()).on_eose(|_| {}));

        for secs in [10, 20, 30] {
            let event = note_at(&keys, secs, "tick");
            assert!(streaming.accept(&event));
            assert!(batched.accept(&event));
        }

        assert!(streaming.events.is_empty());
        assert_eq!(batched.events.len(), 3);
        assert_eq!(streaming.request.since, Some(Timestamp::from(30)));
    }

    #[test]
    fn test_fetch_mode_keeps_cursor() {
        let keys = Keys::generate();
        let mut sub =
            ActiveSubscription::new(SubscriptionRequest::fetch(Filter::new()).on_eose(|_| {}));
        assert!(sub.accept(&note_at(&keys, 100, "fetched")));
        assert_eq!(sub.request.since, None);
    }

    #[test]
    fn test_generated_ids_are_short_hex() {
        let id = generate_subscription_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_subscription_id());
    }
}
