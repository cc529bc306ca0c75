// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed publish/subscribe topics.
//!
//! Each event kind gets its own [`Topic`]. Listeners are called in
//! subscription order; a listener that returns an error is logged and the
//! remaining listeners still run.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::error::ListenerError;

/// Handle returned by [`Topic::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

type Listener<E> = Box<dyn FnMut(&E) -> Result<(), ListenerError>>;

/// A list of listeners for one event type.
pub struct Topic<E> {
    name: &'static str,
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: u32,
}

impl<E> Topic<E> {
    /// Creates an empty topic. `name` only appears in diagnostics.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    /// Adds a listener.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&E) -> Result<(), ListenerError> + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    /// Delivers `event` to every listener and returns how many failed.
    pub fn emit(&mut self, event: &E) -> usize {
        let mut failures = 0;
        for (id, listener) in &mut self.listeners {
            if let Err(err) = listener(event) {
                log::warn!("{} listener {id:?} failed: {err}", self.name);
                failures += 1;
            }
        }
        failures
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> fmt::Debug for Topic<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::RefCell;

    use super::*;

    #[test]
    fn failing_listener_does_not_stop_others() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut topic = Topic::<u32>::new("test");
        let s = Rc::clone(&seen);
        topic.subscribe(move |e| {
            s.borrow_mut().push(("a", *e));
            Err(ListenerError::new("boom"))
        });
        let s = Rc::clone(&seen);
        topic.subscribe(move |e| {
            s.borrow_mut().push(("b", *e));
            Ok(())
        });
        assert_eq!(topic.emit(&7), 1);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let count = Rc::new(RefCell::new(0));
        let mut topic = Topic::<()>::new("test");
        let c = Rc::clone(&count);
        let id = topic.subscribe(move |()| {
            *c.borrow_mut() += 1;
            Ok(())
        });
        topic.emit(&());
        assert!(topic.unsubscribe(id));
        assert!(!topic.unsubscribe(id));
        topic.emit(&());
        assert_eq!(*count.borrow(), 1);
        assert!(topic.is_empty());
    }
}
