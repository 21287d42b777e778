//! A collection of utilities.

mod power_of_2;

pub use power_of_2::PowerOf2;

/// Rounds `n` up to the nearest multiple of `multiple`, or None on overflow.
///
/// `multiple` need not be a power of 2, but must not be 0.
pub(crate) fn checked_round_up(n: usize, multiple: usize) -> Option<usize> {
    debug_assert!(multiple > 0);

    match n % multiple {
        0 => Some(n),
        remainder => n.checked_add(multiple - remainder),
    }
}
