//! An alignment guaranteed to be a power of 2.

use std::{num, ops};

/// PowerOf2
///
/// An integral guaranteed to be non-zero and a power of 2, used to express the alignment of blocks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PowerOf2(num::NonZeroUsize);

impl PowerOf2 {
    /// Creates a new instance of PowerOf2.
    ///
    /// Or nothing if the value is not a power of 2.
    pub fn new(value: usize) -> Option<PowerOf2> {
        if value.is_power_of_two() {
            //  Safety:
            //  -   Value is a power of 2, as per the if check.
            Some(unsafe { PowerOf2::new_unchecked(value) })
        } else {
            None
        }
    }

    /// Creates a new instance of PowerOf2.
    ///
    /// #   Safety
    ///
    /// Assumes that the value is a power of 2.
    pub const unsafe fn new_unchecked(value: usize) -> PowerOf2 {
        //  Safety:
        //  -   A power of 2 cannot be 0.
        PowerOf2(num::NonZeroUsize::new_unchecked(value))
    }

    /// Returns the inner value.
    pub const fn value(&self) -> usize { self.0.get() }

    /// Rounds the value up to the nearest higher multiple of `self`, or None if this would overflow.
    pub const fn checked_round_up(&self, n: usize) -> Option<usize> {
        let mask = self.mask();

        match n.checked_add(mask) {
            Some(n) => Some(n & !mask),
            None => None,
        }
    }

    /// Rounds the value down to the nearest lower multiple of `self`.
    pub const fn round_down(&self, n: usize) -> usize { n & !self.mask() }

    const fn mask(&self) -> usize { self.value() - 1 }
}

impl ops::Rem<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn rem(self, rhs: PowerOf2) -> usize { self & rhs.mask() }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn power_of_2_new() {
    fn new(value: usize) -> Option<usize> {
        PowerOf2::new(value).map(|p| p.value())
    }

    assert_eq!(None, new(0));
    assert_eq!(Some(1), new(1));
    assert_eq!(Some(2), new(2));
    assert_eq!(None, new(3));
    assert_eq!(Some(16), new(16));
    assert_eq!(None, new(24));
}

#[test]
fn power_of_2_rem() {
    fn rem(pow2: usize, n: usize) -> usize {
        n % PowerOf2::new(pow2).expect("Power of 2")
    }

    assert_eq!(0, rem(1, 3));

    assert_eq!(0, rem(16, 0));
    assert_eq!(1, rem(16, 1));
    assert_eq!(15, rem(16, 15));
    assert_eq!(0, rem(16, 16));
    assert_eq!(1, rem(16, 17));
}

#[test]
fn power_of_2_checked_round_up() {
    fn round_up(pow2: usize, n: usize) -> Option<usize> {
        PowerOf2::new(pow2).expect("Power of 2").checked_round_up(n)
    }

    assert_eq!(Some(0), round_up(16, 0));
    assert_eq!(Some(16), round_up(16, 1));
    assert_eq!(Some(16), round_up(16, 16));
    assert_eq!(Some(32), round_up(16, 17));
    assert_eq!(Some(64), round_up(16, 63));

    assert_eq!(None, round_up(16, usize::MAX));
    assert_eq!(None, round_up(16, usize::MAX - 14));
    assert_eq!(Some(usize::MAX - 15), round_up(16, usize::MAX - 15));
}

#[test]
fn power_of_2_round_down() {
    fn round_down(pow2: usize, n: usize) -> usize {
        PowerOf2::new(pow2).expect("Power of 2").round_down(n)
    }

    assert_eq!(0, round_down(16, 15));
    assert_eq!(16, round_down(16, 16));
    assert_eq!(16, round_down(16, 31));
    assert_eq!(32, round_down(16, 32));
}

}
