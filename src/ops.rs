//! Computations that datasets run on their leaves.
//!
//! - [`Map`] turns one leaf value into another (`T -> S`); a map returning a
//!   `Vec<S>` doubles as a flat map.
//! - [`Sketch`] reduces a leaf to a monoid value (`T -> R`); partial sketches are
//!   combined with the sketch's own [`Monoid`] implementation.
//!
//! Both are plain trait objects when used in-process. To run on a remote dataset
//! they must also be [`Transmissible`]: a serializable parameter struct that the
//! receiving service resolves by name in its
//! [`OperationRegistry`](crate::remoting::registry::OperationRegistry). The
//! wire form is a [`Command`].

use crate::error::DatasetError;
use crate::monoid::Monoid;
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

/// Element types that can live in a dataset leaf.
pub trait DataBound: 'static + Send + Sync {}
impl<T> DataBound for T where T: 'static + Send + Sync {}

/// Sketch results; they must cross the wire when sketching remote datasets.
pub trait ResultBound: 'static + Send + Sync + Clone + Serialize + DeserializeOwned {}
impl<T> ResultBound for T where T: 'static + Send + Sync + Clone + Serialize + DeserializeOwned {}

/// An operation that can be described by a name plus serialized parameters.
pub trait Transmissible: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name under which the receiving side registers this operation.
    fn op_name() -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }
}

/// Wire form of a transmissible operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub params: Vec<u8>,
}

impl Command {
    /// Encode `op` into a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be serialized.
    pub fn encode<O: Transmissible>(op: &O) -> Result<Self> {
        let params = postcard::to_allocvec(op)
            .with_context(|| format!("failed to encode parameters of `{}`", O::op_name()))?;
        Ok(Self {
            name: O::op_name().into_owned(),
            params,
        })
    }

    /// Decode the parameters back into `O`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command was built for another operation or the
    /// parameters do not deserialize.
    pub fn decode<O: Transmissible>(&self) -> Result<O> {
        let expected = O::op_name();
        if self.name != expected {
            return Err(anyhow!(
                "command `{}` cannot be decoded as `{expected}`",
                self.name
            ));
        }
        postcard::from_bytes(&self.params)
            .map_err(|e| DatasetError::Transport(format!("bad parameters for `{expected}`: {e}")))
            .map_err(Into::into)
    }
}

/// Pure function from one leaf's data to a new leaf value.
///
/// `apply` must not mutate shared state observable by other leaves; it may run
/// on any worker thread.
pub trait Map<T, S>: Send + Sync + 'static {
    fn apply(&self, data: &T) -> Result<S>;

    /// Human-readable name used in logs.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    /// Wire form of this mapper. Only needed for remote datasets.
    fn command(&self) -> Result<Command> {
        Err(DatasetError::NotTransmissible(self.name().into_owned()).into())
    }
}

/// A monoid plus a way to compute one leaf's contribution.
///
/// `create` must be pure. If it fails, the failure is delivered as a failed
/// stream element, never dropped.
pub trait Sketch<T, R>: Monoid<R> {
    fn create(&self, data: &T) -> Result<R>;

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    fn command(&self) -> Result<Command> {
        Err(DatasetError::NotTransmissible(self.name().into_owned()).into())
    }
}

/// Adapts a shared sketch to the [`Monoid`] it carries.
pub struct SketchMonoid<T, R> {
    sketch: Arc<dyn Sketch<T, R>>,
}

impl<T, R> SketchMonoid<T, R> {
    pub fn new(sketch: Arc<dyn Sketch<T, R>>) -> Self {
        Self { sketch }
    }
}

impl<T: 'static, R: 'static> Monoid<R> for SketchMonoid<T, R> {
    fn zero(&self) -> R {
        self.sketch.zero()
    }

    fn add(&self, left: R, right: R) -> R {
        self.sketch.add(left, right)
    }
}

/// A local-only mapper built from a closure.
///
/// ```
/// use ironfan::ops::{map_fn, Map};
///
/// let double = map_fn(|x: &i64| x * 2);
/// assert_eq!(double.apply(&21).unwrap(), 42);
/// ```
pub struct MapFn<F, T, S> {
    f: F,
    _m: PhantomData<fn(&T) -> S>,
}

pub fn map_fn<T, S, F>(f: F) -> MapFn<F, T, S>
where
    F: Fn(&T) -> S + Send + Sync + 'static,
{
    MapFn { f, _m: PhantomData }
}

impl<T, S, F> Map<T, S> for MapFn<F, T, S>
where
    T: 'static,
    S: 'static,
    F: Fn(&T) -> S + Send + Sync + 'static,
{
    fn apply(&self, data: &T) -> Result<S> {
        Ok((self.f)(data))
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("closure")
    }
}
