//! Poll
//!
//! Consumers layered on top of the allocator, such as trackers of asynchronous query results, own allocations whose
//! lifetime ends when the remote executor reports completion. The Poll step gives them the opportunity to release
//! those allocations right before the allocator reclaims memory.
//!
//! Releases are not applied from within the poll step: they are queued in `Releases`, and applied once the poll step
//! returns, so that the block list is never mutated while being iterated.

use crate::Token;

/// A release requested by a poll step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release<A> {
    /// Release immediately.
    Free(A),
    /// Release once the token has passed.
    FreePendingToken(A, Token),
}

impl<A> Release<A> {
    /// Returns the released address.
    pub fn address(&self) -> &A {
        match self {
            Release::Free(address) => address,
            Release::FreePendingToken(address, _) => address,
        }
    }

    /// Converts the address of the release.
    pub fn map<B, F>(self, fun: F) -> Release<B>
        where
            F: FnOnce(A) -> B,
    {
        match self {
            Release::Free(address) => Release::Free(fun(address)),
            Release::FreePendingToken(address, token) => Release::FreePendingToken(fun(address), token),
        }
    }
}

/// A queue of releases, in the order they were requested.
#[derive(Debug)]
pub struct Releases<A>(Vec<Release<A>>);

impl<A> Releases<A> {
    /// Creates an empty queue.
    pub fn new() -> Self { Self(Vec::new()) }

    /// Requests an immediate release of `address`.
    pub fn free(&mut self, address: A) { self.0.push(Release::Free(address)); }

    /// Requests a release of `address`, pending `token`.
    pub fn free_pending_token(&mut self, address: A, token: Token) {
        self.0.push(Release::FreePendingToken(address, token));
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Returns the number of queued releases.
    pub fn len(&self) -> usize { self.0.len() }

    /// Removes all queued releases, in order.
    pub fn drain(&mut self) -> impl Iterator<Item = Release<A>> + '_ { self.0.drain(..) }
}

impl<A> Default for Releases<A> {
    fn default() -> Self { Self::new() }
}

/// A non-blocking poll step, invoked before memory is reclaimed.
pub trait Poll<A> {
    /// Queues the releases which completed since the last call.
    ///
    /// Must not block.
    fn poll(&mut self, releases: &mut Releases<A>);
}

impl<A, F> Poll<A> for F
    where
        F: FnMut(&mut Releases<A>),
{
    fn poll(&mut self, releases: &mut Releases<A>) { self(releases) }
}

/// A poll step which never releases anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPoll;

impl<A> Poll<A> for NoPoll {
    fn poll(&mut self, _: &mut Releases<A>) {}
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn releases_in_order() {
    let mut releases = Releases::new();
    assert!(releases.is_empty());

    releases.free(32usize);
    releases.free_pending_token(0usize, Token::new(3));

    assert_eq!(2, releases.len());

    let drained: Vec<_> = releases.drain().collect();

    assert_eq!(vec!(Release::Free(32), Release::FreePendingToken(0, Token::new(3))), drained);
    assert!(releases.is_empty());
}

#[test]
fn release_map() {
    let release = Release::FreePendingToken(16usize, Token::new(1)).map(|offset| offset * 2);

    assert_eq!(Release::FreePendingToken(32, Token::new(1)), release);
    assert_eq!(&32, release.address());
}

#[test]
fn poll_closure() {
    let mut completed = vec!(48usize, 96);

    let mut poll = |releases: &mut Releases<usize>| completed.drain(..).for_each(|offset| releases.free(offset));

    let mut releases = Releases::new();

    poll.poll(&mut releases);
    assert_eq!(2, releases.len());

    let mut releases = Releases::<usize>::new();

    NoPoll.poll(&mut releases);
    assert!(releases.is_empty());
}

}
