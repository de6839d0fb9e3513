use ironfan::control::Status;
use ironfan::testing::*;
use ironfan::*;

#[test]
fn fractions_are_clamped_at_one() {
    let pr = PartialResult::new(1.0000001, Some(3i64));
    assert_eq!(pr.done(), 1.0);

    let m = PartialResultMonoid::new(SumSketch);
    let total = m.add(PartialResult::new(0.7, Some(1)), PartialResult::new(0.6, Some(2)));
    assert_eq!(total.done(), 1.0);
    assert_eq!(total.value(), Some(&3));
}

#[test]
fn absent_values_are_neutral() {
    let m = PartialResultMonoid::new(SumSketch);
    let left = m.add(PartialResult::progress(0.25), PartialResult::new(0.25, Some(7)));
    assert_eq!(left, PartialResult::new(0.5, Some(7)));

    let right = m.add(PartialResult::new(0.25, Some(7)), PartialResult::progress(0.25));
    assert_eq!(right, PartialResult::new(0.5, Some(7)));

    let none = m.add(PartialResult::progress(0.1), PartialResult::progress(0.2));
    assert_eq!(none.value(), None);
}

#[test]
fn partial_result_monoid_obeys_laws() {
    let m = PartialResultMonoid::new(SumSketch);
    // fractions are multiples of 1/8 so float addition stays exact
    let samples = vec![
        PartialResult::progress(0.0),
        PartialResult::progress(0.125),
        PartialResult::new(0.25, Some(4)),
        PartialResult::new(0.0, Some(-2)),
    ];
    assert_monoid_laws(&m, &samples);
}

#[test]
fn every_constructor_clamps() {
    assert_eq!(PartialResult::complete(1i64).scaled(3.0).done(), 1.0);
    let (done, value) = PartialResult::new(2.5, Some(4i64)).into_parts();
    assert_eq!(done, 1.0);
    assert_eq!(value, Some(4));
}

#[test]
fn scaled_keeps_the_value() {
    let pr = PartialResult::complete("x".to_string()).scaled(0.5);
    assert_eq!(pr.done(), 0.5);
    assert_eq!(pr.value().map(String::as_str), Some("x"));
}

#[test]
fn status_lists_concatenate_in_order() {
    let a = StatusList::single(Status::ok("a"));
    let b = StatusList(vec![Status::ok("b"), Status::ok("c")]);
    let joined = StatusListMonoid.add(a, b);
    assert_eq!(joined.results(), vec!["a", "b", "c"]);

    let empty = StatusListMonoid.add(StatusListMonoid.zero(), StatusList::new());
    assert!(empty.is_empty());
}

#[test]
fn failed_status_carries_the_error_chain() -> anyhow::Result<()> {
    let err = anyhow::anyhow!("disk full").context("purging cache");
    let status = Status::failed(&err);
    assert!(status.is_failure());
    assert_eq!(status.result, "Exception");
    assert_eq!(status.exception.as_deref(), Some("purging cache: disk full"));
    assert!(!status.hostname.is_empty());

    let json = StatusList::single(status).to_json()?;
    assert!(json.contains("disk full"));
    Ok(())
}
