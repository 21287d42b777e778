#![deny(missing_docs)]

//! Test support for the fenced allocator workspace.

mod lockstep;

pub use lockstep::{Lockstep, LockstepBuilder};
