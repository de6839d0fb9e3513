use anyhow::Result;
use ironfan::testing::*;
use ironfan::*;

#[tokio::test]
async fn leaf_map_emits_marker_then_completion() -> Result<()> {
    let leaf = Dataset::local(20i64);
    let elements = collect_stream(leaf.map(IncrementMap { by: 1 })).await?;

    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].done(), 0.0);
    assert!(elements[0].value().is_none());
    assert_eq!(elements[1].done(), 1.0);

    let mapped = elements[1].value().and_then(Dataset::as_local);
    assert_eq!(mapped.map(|l| *l.data()), Some(21));
    Ok(())
}

#[tokio::test]
async fn leaf_sketch_starts_with_zero() -> Result<()> {
    let leaf = Dataset::local(5i64);
    let elements = collect_stream(leaf.sketch(SumSketch)).await?;

    assert_eq!(elements, vec![PartialResult::new(0.0, Some(0)), PartialResult::complete(5)]);
    assert_progress_converges(&elements);
    Ok(())
}

#[test]
fn inline_and_pooled_leaves_agree() -> Result<()> {
    let pooled = Dataset::local(vec![1i64, 2, 3]);
    let inline = Dataset::local_inline(vec![1i64, 2, 3]);

    assert_eq!(pooled.blocking_sketch(Sum::<i64>::new())?, 6);
    assert_eq!(inline.blocking_sketch(Sum::<i64>::new())?, 6);
    assert!(pooled.as_local().is_some_and(|l| l.separate_thread()));
    assert!(inline.as_local().is_some_and(|l| !l.separate_thread()));
    Ok(())
}

#[test]
fn mapped_leaf_keeps_threading_mode() -> Result<()> {
    let inline = Dataset::local_inline(3i64);
    let mapped = inline.blocking_map(ScaleMap { factor: 3 })?;
    let leaf = mapped.as_local().expect("map of a leaf is a leaf");
    assert_eq!(*leaf.data(), 9);
    assert!(!leaf.separate_thread());
    Ok(())
}

#[test]
fn leaf_flat_map_becomes_fan_out() -> Result<()> {
    let leaf = Dataset::local(4i64);
    let out = futures::executor::block_on(leaf.single_flat_map(RepeatMap { times: 3 }))?;

    assert_eq!(out.kind(), "parallel");
    assert_eq!(leaf_values(&out)?, vec![4, 4, 4]);
    Ok(())
}

#[test]
fn zipping_leaves_pairs_their_values() -> Result<()> {
    let left = Dataset::local(1i64);
    let right = Dataset::local("one".to_string());

    let zipped = left.blocking_zip(&right)?;
    assert_eq!(leaf_values(&zipped)?, vec![Pair::new(1, "one".to_string())]);
    Ok(())
}

#[test]
fn zipping_leaf_with_fan_out_is_a_type_mismatch() {
    let left = Dataset::local(1i64);
    let right = int_leaves(&[1, 2]);

    let err = left.blocking_zip(&right).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::TypeMismatch {
            expected: "local",
            found: "parallel",
            ..
        })
    ));
}

#[test]
fn panicking_map_becomes_a_failed_element() {
    for leaf in [Dataset::local(7i64), Dataset::local_inline(7i64)] {
        let err = leaf.blocking_map(PanicOnMap { value: 7 }).unwrap_err();
        match err.downcast_ref::<DatasetError>() {
            Some(DatasetError::Computation(message)) => assert!(message.contains("refusing to map 7")),
            other => panic!("expected a computation error, got {other:?}"),
        }
    }
}

#[test]
fn failing_sketch_is_delivered_not_dropped() {
    let err = Dataset::local(3i64)
        .blocking_sketch(FailOnSketch { value: 3 })
        .unwrap_err();
    assert!(format!("{err:#}").contains("cannot sketch 3"));
}

#[test]
fn streams_are_cold() {
    let leaf = Dataset::local(1i64);
    // never polled, so the panicking mapper never runs
    let stream = leaf.map(PanicOnMap { value: 1 });
    drop(stream);
}
