//! Token
//!
//! A Token marks a point in the command stream: once the remote executor has processed all the commands enqueued
//! before the token was inserted, the token is said to have passed.
//!
//! Memory released pending a token is read by the remote executor until the token passes; it cannot be reused before.

use std::{fmt, rc::Rc, sync::Arc};

/// An opaque marker in the command stream.
///
/// Tokens are minted by a `TokenSource` in strictly increasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    /// Creates a Token.
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Retrieves the value.
    pub const fn value(&self) -> u64 { self.0 }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Abstraction of the command stream, as far as tokens are concerned.
///
/// All methods take `&self`: a single source is typically shared between the pool and the other consumers of the
/// command stream.
pub trait TokenSource {
    /// Inserts a token in the command stream, and returns it.
    fn insert_token(&self) -> Token;

    /// Blocks until `token` has passed.
    ///
    /// Implementations are expected to flush the command stream first, if the token was not yet flushed, lest the
    /// wait never completes.
    fn wait_for_token(&self, token: Token);

    /// Returns whether `token` has passed, without blocking.
    ///
    /// Once true for a given token, it must remain true.
    fn has_token_passed(&self, token: Token) -> bool;

    /// Returns the flush generation, incremented on every flush.
    ///
    /// Consumers compare generations to avoid flushing again when a flush already occurred.
    fn flush_generation(&self) -> u32;

    /// Flushes the command stream, making all inserted tokens visible to the remote executor.
    fn flush(&self);
}

impl<T> TokenSource for &T
    where
        T: TokenSource + ?Sized,
{
    fn insert_token(&self) -> Token { (**self).insert_token() }

    fn wait_for_token(&self, token: Token) { (**self).wait_for_token(token) }

    fn has_token_passed(&self, token: Token) -> bool { (**self).has_token_passed(token) }

    fn flush_generation(&self) -> u32 { (**self).flush_generation() }

    fn flush(&self) { (**self).flush() }
}

impl<T> TokenSource for Rc<T>
    where
        T: TokenSource + ?Sized,
{
    fn insert_token(&self) -> Token { (**self).insert_token() }

    fn wait_for_token(&self, token: Token) { (**self).wait_for_token(token) }

    fn has_token_passed(&self, token: Token) -> bool { (**self).has_token_passed(token) }

    fn flush_generation(&self) -> u32 { (**self).flush_generation() }

    fn flush(&self) { (**self).flush() }
}

impl<T> TokenSource for Arc<T>
    where
        T: TokenSource + ?Sized,
{
    fn insert_token(&self) -> Token { (**self).insert_token() }

    fn wait_for_token(&self, token: Token) { (**self).wait_for_token(token) }

    fn has_token_passed(&self, token: Token) -> bool { (**self).has_token_passed(token) }

    fn flush_generation(&self) -> u32 { (**self).flush_generation() }

    fn flush(&self) { (**self).flush() }
}

#[cfg(test)]
mod tests {

use crate::internals::test::ScriptedTokens;

use super::*;

#[test]
fn token_ordering() {
    assert!(Token::new(1) < Token::new(2));
    assert_eq!(Token::new(7), Token::new(7));
    assert_eq!("#42", Token::new(42).to_string());
}

#[test]
fn token_source_forwarding() {
    fn insert<T: TokenSource>(source: T) -> Token { source.insert_token() }

    let tokens = Rc::new(ScriptedTokens::new());

    let first = insert(&*tokens);
    let second = insert(tokens.clone());

    assert!(first < second);
    assert!(!tokens.has_token_passed(second));

    tokens.pass(second);

    assert!(tokens.has_token_passed(first));
    assert!(tokens.has_token_passed(second));
}

}
