//! Assertion functions for partial-result streams and monoids.

use crate::dataset::Dataset;
use crate::monoid::Monoid;
use crate::partial::PartialResult;
use crate::stream::DataStream;
use anyhow::{Result, bail};
use futures::StreamExt;
use std::fmt::Debug;

/// Drain a stream into a vector, stopping at the first error.
///
/// # Errors
///
/// Returns the first error the stream yields.
pub async fn collect_stream<R>(mut stream: DataStream<R>) -> Result<Vec<PartialResult<R>>> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item?);
    }
    Ok(out)
}

/// Assert that the fractions of one operation add up to 1.0 and that none of
/// them exceeds it.
///
/// # Panics
///
/// Panics if any fraction is outside `[0, 1]` or the sum is not within `1e-9`
/// of 1.0.
///
/// # Example
///
/// ```
/// use ironfan::PartialResult;
/// use ironfan::testing::assert_progress_converges;
///
/// let prs = vec![PartialResult::<i64>::progress(0.25), PartialResult::new(0.75, Some(3))];
/// assert_progress_converges(&prs);
/// ```
pub fn assert_progress_converges<R>(results: &[PartialResult<R>]) {
    for (i, pr) in results.iter().enumerate() {
        assert!(
            (0.0..=1.0).contains(&pr.done()),
            "fraction at index {i} out of range: {}",
            pr.done()
        );
    }
    let total: f64 = results.iter().map(|pr| pr.done()).sum();
    assert!(
        (total - 1.0).abs() < 1e-9,
        "fractions add up to {total}, expected 1.0 (over {} elements)",
        results.len()
    );
}

/// Assert `add(zero(), x) == x`, `add(x, zero()) == x`, and associativity over
/// every triple drawn from `samples`.
///
/// # Panics
///
/// Panics on the first violated law.
pub fn assert_monoid_laws<R, M>(monoid: &M, samples: &[R])
where
    R: Clone + PartialEq + Debug,
    M: Monoid<R>,
{
    for x in samples {
        assert_eq!(monoid.add(monoid.zero(), x.clone()), *x, "left identity");
        assert_eq!(monoid.add(x.clone(), monoid.zero()), *x, "right identity");
    }
    for a in samples {
        for b in samples {
            for c in samples {
                let left = monoid.add(monoid.add(a.clone(), b.clone()), c.clone());
                let right = monoid.add(a.clone(), monoid.add(b.clone(), c.clone()));
                assert_eq!(left, right, "associativity for ({a:?}, {b:?}, {c:?})");
            }
        }
    }
}

/// Leaf values of a tree of local and fan-out nodes, in child order.
///
/// # Errors
///
/// Fails if the tree contains a remote proxy.
pub fn leaf_values<T: Clone + Send + Sync + 'static>(dataset: &Dataset<T>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    collect_leaves(dataset, &mut out)?;
    Ok(out)
}

fn collect_leaves<T: Clone + Send + Sync + 'static>(dataset: &Dataset<T>, out: &mut Vec<T>) -> Result<()> {
    match dataset {
        Dataset::Local(d) => out.push(d.data().clone()),
        Dataset::Parallel(d) => {
            for child in d.children() {
                collect_leaves(child, out)?;
            }
        }
        Dataset::Remote(d) => bail!("leaf values of remote dataset {} are not local", d.handle()),
    }
    Ok(())
}
