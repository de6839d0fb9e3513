use anyhow::Result;
use ironfan::testing::*;
use ironfan::*;
use std::time::Duration;

#[test]
fn sketch_adds_up_every_leaf() -> Result<()> {
    let tree = int_leaves(&[2, 3, 5]);
    assert_eq!(tree.blocking_sketch(SumSketch)?, 10);
    Ok(())
}

#[test]
fn map_preserves_shape_and_order() -> Result<()> {
    let tree = int_leaves(&[1, 2, 3, 4]);
    let doubled = tree.blocking_map(ScaleMap { factor: 2 })?;

    assert_eq!(doubled.as_parallel().map(ParallelDataset::len), Some(4));
    assert_eq!(leaf_values(&doubled)?, vec![2, 4, 6, 8]);
    assert_eq!(doubled.blocking_sketch(SumSketch)?, 20);
    Ok(())
}

#[test]
fn leaf_order_does_not_change_the_result() -> Result<()> {
    let orders: [&[i64]; 3] = [&[1, 2, 3, 4], &[4, 3, 2, 1], &[2, 4, 1, 3]];
    for order in orders {
        assert_eq!(int_leaves(order).blocking_sketch(SumSketch)?, 10);
    }
    Ok(())
}

#[test]
fn nested_fan_outs_reach_every_leaf() -> Result<()> {
    let tree = Dataset::parallel(vec![
        Dataset::local(1i64),
        int_leaves(&[2, 3, 4]),
        Dataset::parallel(vec![int_leaves(&[5]), Dataset::local(6i64)]),
    ]);
    assert_eq!(tree.blocking_sketch(SumSketch)?, 21);

    let bumped = tree.blocking_map(IncrementMap { by: 10 })?;
    assert_eq!(leaf_values(&bumped)?, vec![11, 12, 13, 14, 15, 16]);
    Ok(())
}

#[tokio::test]
async fn sketch_progress_converges() -> Result<()> {
    let tree = Dataset::parallel(vec![Dataset::local(1i64), int_leaves(&[2, 3, 4])]);
    let elements = collect_stream(tree.sketch(SumSketch)).await?;

    assert_progress_converges(&elements);
    let total = PartialResultMonoid::new(SumSketch).reduce(elements);
    assert_eq!(total.value(), Some(&10));
    Ok(())
}

#[tokio::test]
async fn map_emits_one_value_at_the_end() -> Result<()> {
    let tree = int_leaves(&[1, 2, 3]);
    let elements = collect_stream(tree.map(IncrementMap { by: 1 })).await?;

    assert_progress_converges(&elements);
    let with_value: Vec<_> = elements.iter().filter(|pr| pr.has_value()).collect();
    assert_eq!(with_value.len(), 1);
    assert!(elements.last().is_some_and(PartialResult::has_value));
    Ok(())
}

#[test]
fn flat_map_nests_a_fan_out_per_leaf() -> Result<()> {
    let tree = int_leaves(&[1, 2]);
    let repeated = futures::executor::block_on(tree.single_flat_map(RepeatMap { times: 3 }))?;

    let children = repeated.as_parallel().expect("fan-out").children();
    assert!(children.iter().all(|c| c.kind() == "parallel"));
    assert_eq!(leaf_values(&repeated)?, vec![1, 1, 1, 2, 2, 2]);
    assert_eq!(repeated.blocking_sketch(SumSketch)?, 9);
    Ok(())
}

#[test]
fn zip_pairs_children_by_position() -> Result<()> {
    let left = int_leaves(&[1, 2, 3]);
    let right = int_leaves(&[10, 20, 30]);

    let zipped = left.blocking_zip(&right)?;
    assert_eq!(
        leaf_values(&zipped)?,
        vec![Pair::new(1, 10), Pair::new(2, 20), Pair::new(3, 30)]
    );
    Ok(())
}

#[tokio::test]
async fn zip_of_different_sizes_fails_without_a_value() -> Result<()> {
    let left = int_leaves(&[1, 2, 3]);
    let right = int_leaves(&[1, 2, 3, 4]);

    let mut stream = left.zip(&right);
    let first = futures::StreamExt::next(&mut stream).await.expect("one element");
    let err = first.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DatasetError>(),
        Some(&DatasetError::SizeMismatch { left: 3, right: 4 })
    );
    assert!(futures::StreamExt::next(&mut stream).await.is_none());
    Ok(())
}

#[test]
fn one_failing_child_fails_the_whole_sketch() {
    let tree = int_leaves(&[1, 2, 3, 4]);
    let err = tree.blocking_sketch(FailOnSketch { value: 3 }).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("child 2 failed"), "{chain}");
    assert!(chain.contains("cannot sketch 3"), "{chain}");
}

#[test]
fn one_panicking_child_fails_the_whole_map() {
    let tree = int_leaves(&[1, 2, 3]);
    let err = tree.blocking_map(PanicOnMap { value: 2 }).unwrap_err();
    assert!(format!("{err:#}").contains("computation failed"));
}

#[tokio::test]
async fn failed_sketch_stream_ends_after_the_error() -> Result<()> {
    let tree = inline_int_leaves(&[1, 2, 3]);
    let mut stream = tree.sketch(FailOnSketch { value: 1 });
    let mut errors = 0;
    let mut after_error = 0;
    while let Some(item) = futures::StreamExt::next(&mut stream).await {
        if errors > 0 {
            after_error += 1;
        }
        if item.is_err() {
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
    assert_eq!(after_error, 0);
    Ok(())
}

#[test]
fn empty_fan_out_completes_immediately() -> Result<()> {
    let empty: Dataset<i64> = Dataset::parallel(Vec::new());
    assert_eq!(empty.blocking_sketch(SumSketch)?, 0);

    let mapped = empty.blocking_map(ScaleMap { factor: 2 })?;
    assert_eq!(mapped.as_parallel().map(ParallelDataset::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn bundling_coalesces_ready_results() -> Result<()> {
    let leaves = (1..=4i64).map(Dataset::local_inline).collect();
    let bundled = Dataset::Parallel(
        ParallelDataset::new(leaves).with_bundle_interval(Duration::from_millis(50)),
    );

    let plain = collect_stream(inline_int_leaves(&[1, 2, 3, 4]).sketch(SumSketch)).await?;
    let coalesced = collect_stream(bundled.sketch(SumSketch)).await?;

    assert_eq!(plain.len(), 8);
    assert_eq!(coalesced.len(), 1);
    assert_eq!(coalesced[0], PartialResult::complete(10));

    let mapped = collect_stream(bundled.map(ScaleMap { factor: 2 })).await?;
    assert_eq!(mapped.len(), 1);
    let out = mapped[0].value().expect("bundled map value");
    assert_eq!(
        out.as_parallel().map(ParallelDataset::bundle_interval),
        Some(Duration::from_millis(50))
    );
    assert_eq!(leaf_values(out)?, vec![2, 4, 6, 8]);
    Ok(())
}

#[test]
fn blocking_forms_run_bundled_fan_outs() -> Result<()> {
    let leaves = (1..=4i64).map(Dataset::local_inline).collect();
    let bundled = Dataset::Parallel(
        ParallelDataset::new(leaves).with_bundle_interval(Duration::from_millis(5)),
    );

    assert_eq!(bundled.blocking_sketch(SumSketch)?, 10);
    let doubled = bundled.blocking_map(ScaleMap { factor: 2 })?;
    assert_eq!(doubled.blocking_sketch(SumSketch)?, 20);
    let zipped = bundled.blocking_zip(&doubled)?;
    assert_eq!(zipped.kind(), "parallel");
    Ok(())
}

#[tokio::test]
async fn blocking_forms_refuse_to_run_inside_a_runtime() {
    let err = inline_int_leaves(&[1, 2]).blocking_sketch(SumSketch).unwrap_err();
    assert!(err.to_string().contains("inside a tokio runtime"));
}
