use anyhow::Result;
use ironfan::control::{CountLeaves, FanOutInfo, LeafInfo, PurgeMemoization};
use ironfan::testing::*;
use ironfan::*;
use std::sync::Arc;

fn nested_tree() -> Dataset<i64> {
    Dataset::parallel(vec![Dataset::local(1i64), int_leaves(&[2, 3, 4])])
}

#[tokio::test]
async fn statuses_arrive_in_post_order() -> Result<()> {
    let message = LogMessage::new();
    let statuses = nested_tree().single_manage(Arc::new(message.clone())).await?;

    let expected = vec!["leaf 1", "leaf 2", "leaf 3", "leaf 4", "parallel/3", "parallel/2"];
    assert_eq!(statuses.results(), expected);
    assert_eq!(message.lines(), expected);
    Ok(())
}

#[tokio::test]
async fn failing_hooks_become_failed_statuses() -> Result<()> {
    let statuses = int_leaves(&[1, 2]).single_manage(Arc::new(FailingLeafMessage)).await?;

    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses.failures().count(), 2);
    for status in statuses.iter() {
        assert_eq!(status.result, "Exception");
        assert!(
            status
                .exception
                .as_deref()
                .is_some_and(|e| e.contains("leaf hook failed"))
        );
    }
    Ok(())
}

struct PanickingFanOut;

impl ControlMessage for PanickingFanOut {
    fn local_action(&self, _leaf: &LeafInfo<'_>) -> Result<Option<Status>> {
        Ok(Some(Status::ok("fine")))
    }

    fn parallel_action(&self, _node: &FanOutInfo) -> Result<Option<Status>> {
        panic!("fan-out hook exploded");
    }
}

#[tokio::test]
async fn panicking_hook_does_not_abort_the_walk() -> Result<()> {
    let statuses = nested_tree().single_manage(Arc::new(PanickingFanOut)).await?;

    assert_eq!(statuses.results(), vec!["fine", "fine", "fine", "fine", "Exception", "Exception"]);
    assert!(
        statuses
            .failures()
            .all(|s| s.exception.as_deref().is_some_and(|e| e.contains("fan-out hook exploded")))
    );
    Ok(())
}

#[tokio::test]
async fn hooks_returning_nothing_add_no_status() -> Result<()> {
    let statuses = nested_tree().single_manage(Arc::new(PurgeMemoization)).await?;
    assert!(statuses.is_empty());
    Ok(())
}

#[tokio::test]
async fn count_leaves_reports_one_status_per_leaf() -> Result<()> {
    let statuses = nested_tree().single_manage(Arc::new(CountLeaves)).await?;
    assert_eq!(statuses.len(), 4);
    assert!(statuses.iter().all(|s| s.result == "i64" && !s.is_failure()));

    let strings = Dataset::parallel(vec![Dataset::local("a".to_string())]);
    let statuses = strings.single_manage(Arc::new(CountLeaves)).await?;
    assert_eq!(statuses.results(), vec!["alloc::string::String"]);
    Ok(())
}

#[tokio::test]
async fn manage_stream_converges() -> Result<()> {
    let elements = collect_stream(nested_tree().manage(Arc::new(CountLeaves))).await?;
    assert_progress_converges(&elements);
    Ok(())
}
