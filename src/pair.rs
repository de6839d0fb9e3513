//! Two-slot product used as the element type of zipped datasets.

use serde::{Deserialize, Serialize};

/// An immutable pair where either slot may be absent.
///
/// Zipping two leaves always fills both slots; the `Option`s exist for producers
/// that only know one side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair<A, B> {
    pub first: Option<A>,
    pub second: Option<B>,
}

impl<A, B> Pair<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first: Some(first),
            second: Some(second),
        }
    }

    pub fn first(&self) -> Option<&A> {
        self.first.as_ref()
    }

    pub fn second(&self) -> Option<&B> {
        self.second.as_ref()
    }
}
