//! Cooperative scheduling state.
//!
//! The scheduler is a FIFO queue of ready coroutines plus the currently
//! running one. The run loop itself lives on `Context`; this module owns the
//! queue bookkeeping and the resume-token handshake for async natives.

use std::collections::VecDeque;

use crate::heap::HeapId;

/// A handle delivered to native async functions. Fulfilling it through
/// `Context::resume` transitions the awaiting coroutine from `Waiting` back
/// to `Ready`.
///
/// Tokens are single-shot: each suspension mints a fresh serial, and a stale
/// token is rejected. Fulfillment must happen on the thread owning the
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeToken {
    pub(crate) coroutine: HeapId,
    pub(crate) serial: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    ready: VecDeque<HeapId>,
    current: Option<HeapId>,
    in_loop: bool,
    next_serial: u64,
    next_coroutine: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a coroutine to the ready queue. FIFO order among ready
    /// coroutines is an interface guarantee.
    pub fn enqueue(&mut self, coroutine: HeapId) {
        self.ready.push_back(coroutine);
    }

    pub fn dequeue(&mut self) -> Option<HeapId> {
        self.ready.pop_front()
    }

    pub fn current(&self) -> Option<HeapId> {
        self.current
    }

    pub fn set_current(&mut self, coroutine: Option<HeapId>) {
        self.current = coroutine;
    }

    pub fn in_loop(&self) -> bool {
        self.in_loop
    }

    pub fn set_in_loop(&mut self, value: bool) {
        self.in_loop = value;
    }

    /// Mints a resume token for a suspending coroutine.
    pub fn mint_token(&mut self, coroutine: HeapId) -> ResumeToken {
        let serial = self.next_serial;
        self.next_serial += 1;
        ResumeToken { coroutine, serial }
    }

    /// Sequential names for coroutines ("coro-1", "coro-2", ...).
    pub fn next_coroutine_name(&mut self) -> String {
        self.next_coroutine += 1;
        format!("coro-{}", self.next_coroutine)
    }

    /// Queue contents plus the running coroutine, for root gathering.
    pub fn collect_roots(&self, work: &mut Vec<HeapId>) {
        work.extend(self.ready.iter().copied());
        if let Some(current) = self.current {
            work.push(current);
        }
    }
}
