//! The monoid contract used to combine partial values.
//!
//! A [`Monoid`] provides a neutral element and an associative `add`. The fan-out
//! merge does not fix a reduction order, so implementations must really be
//! associative (and, in practice, commutative) or results are undefined.
//!
//! ```
//! use ironfan::monoid::Monoid;
//! use ironfan::Sum;
//!
//! let m = Sum::<i64>::new();
//! assert_eq!(m.add(m.zero(), 5), 5);
//! assert_eq!(m.reduce(vec![1, 2, 3]), 6);
//! ```

pub trait Monoid<R>: Send + Sync + 'static {
    /// Neutral element; `add(zero(), x) == x`.
    fn zero(&self) -> R;

    /// Associative combination of two values.
    fn add(&self, left: R, right: R) -> R;

    /// Fold a sequence of values, starting from [`zero`](Monoid::zero).
    fn reduce<I>(&self, values: I) -> R
    where
        I: IntoIterator<Item = R>,
        Self: Sized,
    {
        values.into_iter().fold(self.zero(), |acc, v| self.add(acc, v))
    }
}
