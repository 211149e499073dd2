//! The observer registry: views as external, synchronously-notified
//! collaborators.
//!
//! No async, no reentrant mutation: a `notify` callback must not call
//! back into the `Database` that's driving it (documented invariant, not
//! enforced at the type level — the same trust assumption the original
//! `log::trace!`-only observation points make about callers).

use std::collections::HashSet;

use crate::id::Id;

/// Something that wants to hear about version changes it cares about.
pub trait ChangeObserver {
    /// The version ids this observer is watching. A mutating operation
    /// notifies an observer only if the version it just touched is in
    /// this set.
    fn affecting_set(&self) -> &HashSet<Id>;

    /// Called once per touched version id that's in `affecting_set`,
    /// after the store has already persisted the change.
    fn notify(&mut self, changed: &Id);
}

/// The list of registered observers a [`crate::Database`] notifies after
/// every mutating operation.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Box<dyn ChangeObserver>>,
}

impl ObserverRegistry {
    pub fn register(&mut self, observer: Box<dyn ChangeObserver>) {
        self.observers.push(observer);
    }

    /// Notifies every registered observer whose `affecting_set` contains
    /// any of `touched`, in registration order.
    pub fn notify_all(&mut self, touched: &[Id]) {
        for observer in &mut self.observers {
            for id in touched {
                if observer.affecting_set().contains(id) {
                    observer.notify(id);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}
