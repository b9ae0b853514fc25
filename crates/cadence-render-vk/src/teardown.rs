// SPDX-License-Identifier: CEPL-1.0
use tracing::{trace, warn};

type Release<C> = Box<dyn FnOnce(&C)>;

/// Destruction steps recorded in creation order and run in reverse.
///
/// Pushing each native object right after it is created keeps the teardown
/// order equal to the reverse dependency order (framebuffers before the
/// views and render pass they reference, views before their swapchain) and
/// means a half-built generation is still released correctly.
pub struct TeardownList<C = ash::Device> {
    entries: Vec<(&'static str, Release<C>)>,
}

impl<C> Default for TeardownList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TeardownList<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, label: &'static str, release: impl FnOnce(&C) + 'static) {
        self.entries.push((label, Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in the order `flush` will run them.
    pub fn pending(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().rev().map(|(label, _)| *label)
    }

    /// Runs every step, newest first. The caller guarantees no GPU work still
    /// references anything in the list.
    pub fn flush(&mut self, ctx: &C) {
        while let Some((label, release)) = self.entries.pop() {
            trace!("teardown: {}", label);
            release(ctx);
        }
    }
}

impl<C> Drop for TeardownList<C> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                "teardown list dropped with {} unreleased objects: {:?}",
                self.entries.len(),
                self.pending().collect::<Vec<_>>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Log = RefCell<Vec<&'static str>>;

    #[test]
    fn flushes_in_reverse_creation_order() {
        let mut list: TeardownList<Log> = TeardownList::new();
        for label in ["swapchain", "image views", "depth attachment", "framebuffers"] {
            list.push(label, move |log: &Log| log.borrow_mut().push(label));
        }
        assert_eq!(
            list.pending().collect::<Vec<_>>(),
            ["framebuffers", "depth attachment", "image views", "swapchain"]
        );

        let log = Log::default();
        list.flush(&log);
        assert!(list.is_empty());
        assert_eq!(
            *log.borrow(),
            ["framebuffers", "depth attachment", "image views", "swapchain"]
        );
    }

    #[test]
    fn flush_twice_releases_once() {
        let mut list: TeardownList<Log> = TeardownList::new();
        list.push("fence", |log: &Log| log.borrow_mut().push("fence"));
        let log = Log::default();
        list.flush(&log);
        list.flush(&log);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn generations_can_be_appended() {
        let log = Log::default();
        let mut old: TeardownList<Log> = TeardownList::new();
        old.push("old swapchain", |log: &Log| log.borrow_mut().push("old swapchain"));
        let mut new: TeardownList<Log> = TeardownList::new();
        new.push("new swapchain", |log: &Log| log.borrow_mut().push("new swapchain"));

        // The retired generation goes first, so it must be released first.
        old.flush(&log);
        new.flush(&log);
        assert_eq!(*log.borrow(), ["old swapchain", "new swapchain"]);
    }
}
