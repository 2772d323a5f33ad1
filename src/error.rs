//! Error kinds and the per-thread diagnostic trail.
//!
//! Every fallible operation in this crate returns a [`DfiError`]. On top of
//! the structured kinds, a bounded thread-local trail of rendered messages is
//! kept so embedders can drain diagnostics after a failed call without
//! changing signatures ([`trail`]).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DfiError>;

/// The error kinds produced by descriptor parsing, instance handling and the
/// codecs.
#[derive(Debug, Error)]
pub enum DfiError {
    /// Malformed descriptor, unexpected token or unknown reference.
    #[error("parse error: {0}")]
    Parse(String),
    /// An allocation request could not be satisfied.
    #[error("out of memory: {0}")]
    Oom(String),
    /// Null/invalid caller input, index out of bounds or a wrong variant for
    /// the requested operation.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    /// Operation invoked in the wrong lifecycle phase.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// Container-file I/O failure.
    #[error("i/o error: {0}")]
    Io(std::io::Error),
    /// Wire-format or JSON-document violation.
    #[error("decode error: {0}")]
    Decode(String),
}

impl DfiError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::debug!("parse error: {msg}");
        trail::push(&msg);
        DfiError::Parse(msg)
    }

    pub(crate) fn oom(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("allocation failure: {msg}");
        trail::push(&msg);
        DfiError::Oom(msg)
    }

    pub(crate) fn illegal_argument(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::debug!("illegal argument: {msg}");
        trail::push(&msg);
        DfiError::IllegalArgument(msg)
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::debug!("illegal state: {msg}");
        trail::push(&msg);
        DfiError::IllegalState(msg)
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::debug!("decode error: {msg}");
        trail::push(&msg);
        DfiError::Decode(msg)
    }
}

impl From<std::io::Error> for DfiError {
    fn from(err: std::io::Error) -> Self {
        log::debug!("i/o error: {err}");
        trail::push(err.to_string());
        DfiError::Io(err)
    }
}

pub mod trail {
    //! A bounded, thread-local LIFO of diagnostic messages.
    //!
    //! Failing operations push at least one message here before returning.
    //! Callers that recover should drain the trail (via [`pop_last`] or
    //! [`reset`]) so stale diagnostics do not outlive the failure they
    //! describe.

    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Maximum number of retained messages per thread. Overflow discards the
    /// oldest entry.
    const MAX_ENTRIES: usize = 64;

    thread_local! {
        static TRAIL: RefCell<VecDeque<String>> = const { RefCell::new(VecDeque::new()) };
    }

    /// Append a message to this thread's trail.
    pub fn push(msg: impl Into<String>) {
        TRAIL.with(|t| {
            let mut t = t.borrow_mut();
            if t.len() == MAX_ENTRIES {
                t.pop_front();
            }
            t.push_back(msg.into());
        });
    }

    /// Consume and return the most recent message.
    pub fn pop_last() -> Option<String> {
        TRAIL.with(|t| t.borrow_mut().pop_back())
    }

    /// Visit all retained messages, oldest first.
    pub fn for_each(mut f: impl FnMut(&str)) {
        TRAIL.with(|t| {
            for msg in t.borrow().iter() {
                f(msg);
            }
        });
    }

    /// Drop all retained messages.
    pub fn reset() {
        TRAIL.with(|t| t.borrow_mut().clear());
    }

    /// Number of retained messages.
    pub fn count() -> usize {
        TRAIL.with(|t| t.borrow().len())
    }
}
