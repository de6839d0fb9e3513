//! Ready-made sketches over `Vec<T>` leaves: Sum, Count, Min, Max.
//!
//! Each one is a [`Monoid`] over its result, a [`Sketch`] computing one leaf's
//! contribution, and [`Transmissible`], so it can be sent to remote datasets once
//! registered with the service.

use crate::monoid::Monoid;
use crate::ops::{Command, Sketch, Transmissible};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::Add;

/// Element types the built-in sketches can travel with.
pub trait Element: 'static + Send + Sync + Clone + Serialize + DeserializeOwned {}
impl<T> Element for T where T: 'static + Send + Sync + Clone + Serialize + DeserializeOwned {}

/* ===================== Sum<T> ===================== */

/// Sum of all elements.
///
/// Requires `T: Add<Output=T> + Default`; `zero()` is `T::default()`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Sum<T>(#[serde(skip)] pub PhantomData<T>);

impl<T> Sum<T> {
    /// Convenience constructor (same as `Default`).
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Monoid<T> for Sum<T>
where
    T: Element + Add<Output = T> + Default,
{
    fn zero(&self) -> T {
        T::default()
    }

    fn add(&self, left: T, right: T) -> T {
        left + right
    }
}

impl<T> Sketch<Vec<T>, T> for Sum<T>
where
    T: Element + Add<Output = T> + Default,
{
    fn create(&self, data: &Vec<T>) -> Result<T> {
        Ok(data.iter().cloned().fold(T::default(), |a, v| a + v))
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

impl<T: Element> Transmissible for Sum<T> {}

/* ===================== Count ===================== */

/// Number of elements.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Count;

impl Monoid<u64> for Count {
    fn zero(&self) -> u64 {
        0
    }

    fn add(&self, left: u64, right: u64) -> u64 {
        left + right
    }
}

impl<T: Element> Sketch<Vec<T>, u64> for Count {
    fn create(&self, data: &Vec<T>) -> Result<u64> {
        Ok(data.len() as u64)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

impl Transmissible for Count {}

/* ===================== Min<T> ===================== */

/// Smallest element; `None` for an empty dataset.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Min<T>(#[serde(skip)] pub PhantomData<T>);

impl<T> Min<T> {
    /// Convenience constructor (same as `Default`).
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Element + Ord> Monoid<Option<T>> for Min<T> {
    fn zero(&self) -> Option<T> {
        None
    }

    fn add(&self, left: Option<T>, right: Option<T>) -> Option<T> {
        match (left, right) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

impl<T: Element + Ord> Sketch<Vec<T>, Option<T>> for Min<T> {
    fn create(&self, data: &Vec<T>) -> Result<Option<T>> {
        Ok(data.iter().min().cloned())
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

impl<T: Element> Transmissible for Min<T> {}

/* ===================== Max<T> ===================== */

/// Largest element; `None` for an empty dataset.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Max<T>(#[serde(skip)] pub PhantomData<T>);

impl<T> Max<T> {
    /// Convenience constructor (same as `Default`).
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Element + Ord> Monoid<Option<T>> for Max<T> {
    fn zero(&self) -> Option<T> {
        None
    }

    fn add(&self, left: Option<T>, right: Option<T>) -> Option<T> {
        match (left, right) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

impl<T: Element + Ord> Sketch<Vec<T>, Option<T>> for Max<T> {
    fn create(&self, data: &Vec<T>) -> Result<Option<T>> {
        Ok(data.iter().max().cloned())
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

impl<T: Element> Transmissible for Max<T> {}

