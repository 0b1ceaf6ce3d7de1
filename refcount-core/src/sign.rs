//! Sign/constant inference (C5): the `Range` abstract domain and its
//! lattice operations (spec §4.5, P8).

use std::cmp::Ordering;

/// A point in the sign lattice: `EMPTY < {named ranges} < ANY`, plus every
/// concrete integer sits strictly inside the named range(s) containing it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Range {
    Empty,
    Negative,
    Positive,
    Zero,
    /// `>= 0`
    NonNeg,
    /// `<= 0`
    NonPos,
    NonZero,
    Any,
    Concrete(i64),
}

impl Range {
    pub fn is_constant(&self) -> bool {
        matches!(self, Range::Concrete(_) | Range::Zero)
    }

    fn concrete_sign(i: i64) -> Range {
        match i.cmp(&0) {
            Ordering::Equal => Range::Zero,
            _ => Range::Concrete(i),
        }
    }

    fn contains_concrete(&self, i: i64) -> bool {
        match self {
            Range::Empty => false,
            Range::Any => true,
            Range::Negative => i < 0,
            Range::Positive => i > 0,
            Range::Zero => i == 0,
            Range::NonNeg => i >= 0,
            Range::NonPos => i <= 0,
            Range::NonZero => i != 0,
            Range::Concrete(c) => *c == i,
        }
    }

    /// Ordering predicate: is `self` a subset of `other`?
    pub fn subset_of(&self, other: Range) -> bool {
        if *self == other {
            return true;
        }
        match (*self, other) {
            (Range::Empty, _) => true,
            (_, Range::Any) => true,
            (Range::Concrete(i), r) => r.contains_concrete(i),
            (Range::Zero, Range::NonNeg | Range::NonPos) => true,
            (Range::Positive, Range::NonNeg | Range::NonZero) => true,
            (Range::Negative, Range::NonPos | Range::NonZero) => true,
            _ => false,
        }
    }

    /// Meet: used on unification (spec: "EMPTY signals path infeasibility").
    /// Commutative, associative, idempotent (P8).
    pub fn intersects(self, other: Range) -> Range {
        if self == other {
            return self;
        }
        match (self, other) {
            (Range::Any, r) | (r, Range::Any) => r,
            (Range::Empty, _) | (_, Range::Empty) => Range::Empty,
            (Range::Concrete(i), r) | (r, Range::Concrete(i)) => {
                if r.contains_concrete(i) {
                    Range::concrete_sign(i)
                } else {
                    Range::Empty
                }
            }
            (Range::Zero, r) | (r, Range::Zero) => {
                if r.contains_concrete(0) {
                    Range::Zero
                } else {
                    Range::Empty
                }
            }
            (Range::NonNeg, Range::Positive) | (Range::Positive, Range::NonNeg) => Range::Positive,
            (Range::NonNeg, Range::NonPos) | (Range::NonPos, Range::NonNeg) => Range::Zero,
            (Range::NonNeg, Range::Negative) | (Range::Negative, Range::NonNeg) => Range::Empty,
            (Range::NonNeg, Range::NonZero) | (Range::NonZero, Range::NonNeg) => Range::Positive,
            (Range::NonPos, Range::Negative) | (Range::Negative, Range::NonPos) => Range::Negative,
            (Range::NonPos, Range::Positive) | (Range::Positive, Range::NonPos) => Range::Empty,
            (Range::NonPos, Range::NonZero) | (Range::NonZero, Range::NonPos) => Range::Negative,
            (Range::Negative, Range::Positive) | (Range::Positive, Range::Negative) => Range::Empty,
            (Range::Negative, Range::NonZero) | (Range::NonZero, Range::Negative) => Range::Negative,
            (Range::Positive, Range::NonZero) | (Range::NonZero, Range::Positive) => Range::Positive,
            _ => Range::Empty,
        }
    }

    /// Join: used at control-flow merges. `EMPTY` is the identity (P8).
    pub fn unions(self, other: Range) -> Range {
        if self == other {
            return self;
        }
        match (self, other) {
            (Range::Empty, r) | (r, Range::Empty) => r,
            (Range::Any, _) | (_, Range::Any) => Range::Any,
            (Range::Concrete(i), Range::Concrete(j)) => {
                if i == j {
                    Range::concrete_sign(i)
                } else if (i > 0) == (j > 0) && i != 0 && j != 0 {
                    Range::Positive.min_covering(i, j)
                } else {
                    Range::Any
                }
            }
            (Range::Concrete(i), r) | (r, Range::Concrete(i)) => r.widen_with_concrete(i),
            (Range::Zero, Range::Positive) | (Range::Positive, Range::Zero) => Range::NonNeg,
            (Range::Zero, Range::Negative) | (Range::Negative, Range::Zero) => Range::NonPos,
            (Range::Zero, Range::NonNeg) | (Range::NonNeg, Range::Zero) => Range::NonNeg,
            (Range::Zero, Range::NonPos) | (Range::NonPos, Range::Zero) => Range::NonPos,
            (Range::Positive, Range::Negative) | (Range::Negative, Range::Positive) => {
                Range::NonZero
            }
            (Range::Positive, Range::NonNeg) | (Range::NonNeg, Range::Positive) => Range::NonNeg,
            (Range::Negative, Range::NonPos) | (Range::NonPos, Range::Negative) => Range::NonPos,
            _ => Range::Any,
        }
    }

    fn widen_with_concrete(self, i: i64) -> Range {
        if self.contains_concrete(i) {
            self
        } else {
            match self {
                Range::Positive if i == 0 => Range::NonNeg,
                Range::Negative if i == 0 => Range::NonPos,
                Range::NonNeg if i < 0 => Range::Any,
                Range::NonPos if i > 0 => Range::Any,
                Range::NonZero if i == 0 => Range::Any,
                _ => Range::Any,
            }
        }
    }

    fn min_covering(self, i: i64, j: i64) -> Range {
        if i > 0 && j > 0 {
            Range::Positive
        } else if i < 0 && j < 0 {
            Range::Negative
        } else {
            Range::Any
        }
    }

    /// Logical complement under sign-domain rules. `negates ∘ negates =
    /// identity` on the six named non-extreme points (P8).
    pub fn negates(self) -> Range {
        match self {
            Range::Positive => Range::NonPos,
            Range::NonPos => Range::Positive,
            Range::Negative => Range::NonNeg,
            Range::NonNeg => Range::Negative,
            Range::Zero => Range::NonZero,
            Range::NonZero => Range::Zero,
            Range::Any => Range::Any,
            Range::Empty => Range::Empty,
            Range::Concrete(i) => {
                if i == 0 {
                    Range::NonZero
                } else {
                    Range::Any
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersects_is_commutative_and_idempotent() {
        let points = [
            Range::Empty,
            Range::Negative,
            Range::Positive,
            Range::Zero,
            Range::NonNeg,
            Range::NonPos,
            Range::NonZero,
            Range::Any,
            Range::Concrete(3),
            Range::Concrete(-3),
        ];
        for &a in &points {
            assert_eq!(a.intersects(a), a, "idempotent for {a:?}");
            for &b in &points {
                assert_eq!(a.intersects(b), b.intersects(a), "commutative {a:?} {b:?}");
            }
        }
    }

    #[test]
    fn empty_is_absorbing_under_intersects_and_identity_under_unions() {
        for r in [Range::Positive, Range::NonNeg, Range::Any, Range::Concrete(5)] {
            assert_eq!(Range::Empty.intersects(r), Range::Empty);
            assert_eq!(Range::Empty.unions(r), r);
        }
    }

    #[test]
    fn negates_is_an_involution_on_named_points() {
        for r in [
            Range::NonNeg,
            Range::Positive,
            Range::NonPos,
            Range::Negative,
            Range::NonZero,
            Range::Zero,
        ] {
            assert_eq!(r.negates().negates(), r);
        }
    }

    #[test]
    fn nonneg_meets_follow_the_sign_table() {
        assert_eq!(Range::NonNeg.intersects(Range::Positive), Range::Positive);
        assert_eq!(Range::NonNeg.intersects(Range::NonPos), Range::Zero);
        assert_eq!(Range::NonNeg.intersects(Range::Negative), Range::Empty);
        assert_eq!(Range::NonNeg.intersects(Range::NonZero), Range::Positive);
    }

    #[test]
    fn concrete_point_intersect_checks_membership() {
        assert_eq!(Range::Positive.intersects(Range::Concrete(5)), Range::Concrete(5));
        assert_eq!(Range::Positive.intersects(Range::Concrete(-5)), Range::Empty);
    }
}
