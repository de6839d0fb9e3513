//! Partial results and the monoid they induce.
//!
//! Every dataset operation produces a stream of [`PartialResult`]s. Each element
//! reports a *fraction* of the total work it accounts for and may carry a value.
//! Summing the fractions of one stream approaches 1.0; adding the values with the
//! operation's monoid gives the final answer.
//!
//! [`PartialResultMonoid`] lifts any [`Monoid`] over values to a monoid over whole
//! partial results: fractions add (clamped at 1.0) and present values combine,
//! while an absent value acts as the neutral element.

use crate::monoid::Monoid;
use serde::Serialize;
use std::marker::PhantomData;

/// `(fraction done, optional value)`, created fresh for each emission.
///
/// `done` never exceeds 1.0; every constructor clamps it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartialResult<R> {
    done: f64,
    value: Option<R>,
}

impl<R> PartialResult<R> {
    /// Floating point summation may overshoot; the fraction is clamped to 1.0.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `done` is negative.
    pub fn new(done: f64, value: Option<R>) -> Self {
        debug_assert!(done >= 0.0, "negative progress {done}");
        Self {
            done: done.min(1.0),
            value,
        }
    }

    /// A progress marker with no value.
    pub fn progress(done: f64) -> Self {
        Self::new(done, None)
    }

    /// A completion element carrying the whole value.
    pub fn complete(value: R) -> Self {
        Self::new(1.0, Some(value))
    }

    pub fn done(&self) -> f64 {
        self.done
    }

    pub fn value(&self) -> Option<&R> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<R> {
        self.value
    }

    pub fn into_parts(self) -> (f64, Option<R>) {
        (self.done, self.value)
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Rescale the fraction, keeping the value. Used by fan-out nodes.
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.done * factor, self.value)
    }

    pub fn map_value<S>(self, f: impl FnOnce(R) -> S) -> PartialResult<S> {
        PartialResult {
            done: self.done,
            value: self.value.map(f),
        }
    }
}

/// Monoid over [`PartialResult<R>`] induced by a monoid over `R`.
pub struct PartialResultMonoid<R, M> {
    inner: M,
    _r: PhantomData<fn() -> R>,
}

impl<R, M: Monoid<R>> PartialResultMonoid<R, M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            _r: PhantomData,
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<R, M> Monoid<PartialResult<R>> for PartialResultMonoid<R, M>
where
    R: 'static,
    M: Monoid<R>,
{
    fn zero(&self) -> PartialResult<R> {
        PartialResult::progress(0.0)
    }

    fn add(&self, left: PartialResult<R>, right: PartialResult<R>) -> PartialResult<R> {
        let value = match (left.value, right.value) {
            (Some(a), Some(b)) => Some(self.inner.add(a, b)),
            (a, None) => a,
            (None, b) => b,
        };
        PartialResult::new(left.done + right.done, value)
    }
}
