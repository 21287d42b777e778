//! Timeline, a TokenSource.
//!
//! A Timeline hands out tokens in increasing order, each marking a point in the stream of commands submitted to the
//! remote executor. A token passes once the executor has executed all commands up to it.
//!
//! Tokens only become visible to the executor once flushed, hence waiting for a token flushes first.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use fenced_core::{Token, TokenSource};

/// A TokenSource, shared between clones.
///
/// A Timeline is either:
///
/// -   Synchronous: flushing retires all tokens, as if the executor executed commands as soon as submitted.
/// -   Remote: tokens are retired by the paired `Executor`, typically running on another thread.
#[derive(Debug)]
pub struct Timeline {
    shared: Arc<Shared>,
}

impl Timeline {
    /// Creates a synchronous Timeline.
    pub fn synchronous() -> Self { Self::with_mode(Mode::Synchronous) }

    /// Creates a remote Timeline, and its paired Executor.
    pub fn remote() -> (Self, Executor) {
        let timeline = Self::with_mode(Mode::Remote);
        let executor = Executor { shared: timeline.shared.clone() };

        (timeline, executor)
    }

    /// Returns the last token inserted, if any.
    pub fn last_inserted(&self) -> Option<Token> { token_of(self.shared.lock().inserted) }

    /// Returns the last token retired, if any.
    pub fn last_retired(&self) -> Option<Token> { token_of(self.shared.lock().retired) }

    /// Returns whether the executor is gone, in which case all tokens are considered passed.
    pub fn is_lost(&self) -> bool { self.shared.lock().lost }

    //  Internal.
    fn with_mode(mode: Mode) -> Self {
        let state = State { mode, timelines: 1, ..State::default() };

        Self { shared: Arc::new(Shared { state: Mutex::new(state), condition: Condvar::new() }) }
    }
}

impl TokenSource for Timeline {
    fn insert_token(&self) -> Token {
        let mut state = self.shared.lock();

        state.inserted += 1;

        Token::new(state.inserted)
    }

    fn wait_for_token(&self, token: Token) {
        let mut state = self.shared.lock();

        if state.has_passed(token) {
            return;
        }

        if state.flushed < token.value() {
            state.flush();
            self.shared.condition.notify_all();

            if state.has_passed(token) {
                return;
            }
        }

        trace!(%token, "waiting for executor");

        let state = self.shared.condition
            .wait_while(state, |state| !state.has_passed(token))
            .unwrap_or_else(PoisonError::into_inner);

        if state.lost {
            debug!(%token, "executor lost while waiting");
        }
    }

    fn has_token_passed(&self, token: Token) -> bool { self.shared.lock().has_passed(token) }

    fn flush_generation(&self) -> u32 { self.shared.lock().generation }

    fn flush(&self) {
        let mut state = self.shared.lock();

        state.flush();

        self.shared.condition.notify_all();
    }
}

impl Clone for Timeline {
    fn clone(&self) -> Self {
        self.shared.lock().timelines += 1;

        Self { shared: self.shared.clone() }
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.shared.lock().timelines -= 1;

        self.shared.condition.notify_all();
    }
}

/// The executor side of a remote `Timeline`.
///
/// Dropping the Executor marks the Timeline as lost: all tokens are then considered passed, so that no waiter blocks
/// forever.
#[derive(Debug)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Blocks until new tokens are flushed, and returns the last one flushed.
    ///
    /// Returns None once all timelines are dropped, and all tokens flushed are retired.
    pub fn wait_for_work(&self) -> Option<Token> {
        let state = self.shared.lock();

        let state = self.shared.condition
            .wait_while(state, |state| state.flushed == state.retired && state.timelines > 0)
            .unwrap_or_else(PoisonError::into_inner);

        if state.flushed == state.retired {
            None
        } else {
            token_of(state.flushed)
        }
    }

    /// Retires all tokens up to, and including, `token`.
    ///
    /// Tokens not yet flushed cannot be retired; the retirement stops at the last flushed token.
    pub fn retire(&self, token: Token) {
        let mut state = self.shared.lock();

        let retired = token.value().min(state.flushed);

        if retired > state.retired {
            state.retired = retired;
            self.shared.condition.notify_all();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shared.lock().lost = true;

        self.shared.condition.notify_all();
    }
}

//
//  Implementation details
//

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Synchronous,
    Remote,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    condition: Condvar,
}

impl Shared {
    //  The state is consistent at any point a panic may occur, hence poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }
}

#[derive(Debug, Default)]
struct State {
    mode: Mode,
    //  Invariant: retired <= flushed <= inserted.
    inserted: u64,
    flushed: u64,
    retired: u64,
    generation: u32,
    timelines: usize,
    lost: bool,
}

impl State {
    fn has_passed(&self, token: Token) -> bool { self.lost || token.value() <= self.retired }

    fn flush(&mut self) {
        self.flushed = self.inserted;
        self.generation = self.generation.wrapping_add(1);

        if self.mode == Mode::Synchronous {
            self.retired = self.flushed;
        }
    }
}

fn token_of(value: u64) -> Option<Token> { if value == 0 { None } else { Some(Token::new(value)) } }
