use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Listener invoked with the object raising the event and the event parameter.
pub type Handler<S, P> = Arc<dyn Fn(&S, &P) + Send + Sync>;

/// Ordered listener list owned by a lifecycle-emitting object.
pub struct EventHandlers<S, P> {
    handlers: RwLock<Vec<Handler<S, P>>>,
}

impl<S, P> EventHandlers<S, P> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn attach(&self, handler: Handler<S, P>) {
        self.handlers.write().push(handler);
    }

    /// Invokes every attached listener in attachment order.
    ///
    /// Listeners run against a snapshot, so a listener attaching another one to
    /// the same list does not deadlock; the new listener fires on the next raise.
    pub fn raise(&self, sender: &S, param: &P) {
        let snapshot: Vec<_> = self.handlers.read().iter().cloned().collect();
        for handler in snapshot {
            handler(sender, param);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl<S, P> Default for EventHandlers<S, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, P> fmt::Debug for EventHandlers<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("len", &self.len())
            .finish()
    }
}
