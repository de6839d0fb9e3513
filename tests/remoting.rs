use anyhow::Result;
use futures::StreamExt;
use ironfan::config::{RemoteConfig, ServiceConfig};
use ironfan::control::{CountLeaves, DeleteAllDatasets, PurgeMemoization, ServiceControl, ToggleMemoization};
use ironfan::ops::{Command, Transmissible};
use ironfan::remoting::{HostedDataset, LocalChannel};
use ironfan::testing::*;
use ironfan::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn remote_error(err: &anyhow::Error) -> &str {
    match err.downcast_ref::<DatasetError>() {
        Some(DatasetError::Remote(message)) => message,
        other => panic!("expected a remote failure, got {other:?}: {err:#}"),
    }
}

fn handle_of<T>(dataset: &Dataset<T>) -> Handle {
    match dataset {
        Dataset::Remote(d) => d.handle(),
        other => panic!("expected a remote dataset, got {other:?}"),
    }
}

#[tokio::test]
async fn sketch_through_a_proxy() -> Result<()> {
    let (_service, proxy) = hosted("local://sketch", int_leaves(&[2, 3, 5]), ServiceConfig::default())?;
    assert_eq!(proxy.single_sketch(SumSketch).await?, 10);

    let elements = collect_stream(proxy.sketch(SumSketch)).await?;
    assert_progress_converges(&elements);
    Ok(())
}

#[tokio::test]
async fn map_installs_a_new_dataset() -> Result<()> {
    let (service, proxy) = hosted("local://map", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;

    let doubled = proxy.single_map(ScaleMap { factor: 2 }).await?;
    assert_ne!(handle_of(&doubled), Handle::ROOT);
    assert_eq!(service.dataset_count(), 2);
    assert_eq!(doubled.single_sketch(SumSketch).await?, 12);

    let hosted = service.dataset(handle_of(&doubled)).expect("installed");
    assert_eq!(hosted.element_type(), "i64");
    Ok(())
}

#[tokio::test]
async fn flat_map_through_a_proxy() -> Result<()> {
    let (_service, proxy) = hosted("local://flat", int_leaves(&[1, 2]), ServiceConfig::default())?;
    let repeated = proxy.single_flat_map(RepeatMap { times: 2 }).await?;
    assert_eq!(repeated.single_sketch(SumSketch).await?, 6);
    Ok(())
}

#[tokio::test]
async fn zip_of_proxies_on_one_service() -> Result<()> {
    let (service, proxy) = hosted("local://zip", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;
    let doubled = proxy.single_map(ScaleMap { factor: 2 }).await?;

    let zipped = proxy.single_zip(&doubled).await?;
    let hosted = service.dataset(handle_of(&zipped)).expect("installed");
    assert!(hosted.element_type().contains("Pair<i64, i64>"));

    let statuses = zipped.single_manage(Arc::new(CountLeaves)).await?;
    assert_eq!(statuses.len(), 3);
    Ok(())
}

#[tokio::test]
async fn zip_of_mismatched_remote_shapes_fails_remotely() -> Result<()> {
    let (_service, proxy) = hosted("local://zip-shape", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;
    let nested = proxy.single_flat_map(RepeatMap { times: 2 }).await?;

    let err = proxy.single_zip(&nested).await.unwrap_err();
    assert!(remote_error(&err).contains("type mismatch"));
    Ok(())
}

#[tokio::test]
async fn zip_across_endpoints_fails_before_sending() -> Result<()> {
    let (left_service, left) = hosted("local://left", int_leaves(&[1]), ServiceConfig::default())?;
    let (_right_service, right) = hosted("local://right", int_leaves(&[1]), ServiceConfig::default())?;

    let err = left.single_zip(&right).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DatasetError>(),
        Some(&DatasetError::EndpointMismatch {
            left: "local://left".into(),
            right: "local://right".into(),
        })
    );
    assert_eq!(left_service.dataset_count(), 1);

    let local = int_leaves(&[1]);
    let err = left.single_zip(&local).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::TypeMismatch { expected: "remote", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn unknown_handle_is_reported() -> Result<()> {
    let (service, _proxy) = hosted("local://handles", int_leaves(&[1]), ServiceConfig::default())?;
    let dangling: Dataset<i64> = Dataset::remote(LocalChannel::new(Arc::clone(&service)), Handle::new(99));

    let err = dangling.single_sketch(SumSketch).await.unwrap_err();
    assert!(remote_error(&err).contains("#99 does not exist"));
    Ok(())
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct Negate;

impl Transmissible for Negate {}

impl Map<i64, i64> for Negate {
    fn apply(&self, data: &i64) -> Result<i64> {
        Ok(-data)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

#[tokio::test]
async fn unregistered_operation_is_reported() -> Result<()> {
    let (_service, proxy) = hosted("local://registry", int_leaves(&[1]), ServiceConfig::default())?;
    let err = proxy.single_map(Negate).await.unwrap_err();
    assert!(remote_error(&err).contains("no operation registered"));
    Ok(())
}

#[tokio::test]
async fn closures_cannot_reach_a_remote_dataset() -> Result<()> {
    let (service, proxy) = hosted("local://closure", int_leaves(&[1]), ServiceConfig::default())?;

    let err = proxy.single_map(map_fn(|x: &i64| x + 1)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::NotTransmissible(_))
    ));

    let err = proxy.single_manage(Arc::new(LogMessage::new())).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::NotTransmissible(_))
    ));
    assert!(service.active_operations().is_empty());
    Ok(())
}

#[tokio::test]
async fn remote_failures_arrive_as_errors() -> Result<()> {
    let (service, proxy) = hosted("local://failures", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;

    let err = proxy.single_sketch(FailOnSketch { value: 2 }).await.unwrap_err();
    assert!(remote_error(&err).contains("cannot sketch 2"));

    let err = proxy.single_map(PanicOnMap { value: 3 }).await.unwrap_err();
    assert!(remote_error(&err).contains("refusing to map 3"));

    // the service keeps serving
    assert_eq!(proxy.single_sketch(SumSketch).await?, 6);
    assert!(service.active_operations().is_empty());
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_unsubscribes() -> Result<()> {
    let (service, proxy) = hosted("local://cancel", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;

    let mut stream = proxy.sketch(SlowSketch { delay_ms: 300 });
    let first = stream.next().await.expect("a progress element")?;
    assert_eq!(first.done(), 0.0);
    let active = service.active_operations();
    assert_eq!(active.len(), 1);

    drop(stream);
    assert!(service.active_operations().is_empty());
    assert!(!service.unsubscribe(active[0]));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(service.memoized_results(), 0);
    Ok(())
}

#[tokio::test]
async fn unsubscribing_an_unknown_operation_is_harmless() -> Result<()> {
    let (service, _proxy) = hosted("local://unknown-op", int_leaves(&[1]), ServiceConfig::default())?;
    assert!(!service.unsubscribe(OperationId::new()));
    Ok(())
}

#[tokio::test]
async fn timeout_fails_the_stream_and_unsubscribes() -> Result<()> {
    let (service, proxy) = hosted("local://timeout", int_leaves(&[1]), ServiceConfig::default())?;
    let impatient = match proxy {
        Dataset::Remote(d) => Dataset::Remote(d.with_config(RemoteConfig::with_timeout(Duration::from_millis(50)))),
        other => other,
    };

    let err = impatient.single_sketch(SlowSketch { delay_ms: 500 }).await.unwrap_err();
    match err.downcast_ref::<DatasetError>() {
        Some(DatasetError::Transport(message)) => assert!(message.contains("timed out")),
        other => panic!("expected a transport failure, got {other:?}"),
    }
    assert!(service.active_operations().is_empty());
    Ok(())
}

#[tokio::test]
async fn repeated_requests_are_memoized() -> Result<()> {
    let (service, proxy) = hosted("local://memo", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;

    let first = proxy.single_map(IncrementMap { by: 1 }).await?;
    let again = proxy.single_map(IncrementMap { by: 1 }).await?;
    let other = proxy.single_map(IncrementMap { by: 2 }).await?;
    assert_eq!(handle_of(&first), handle_of(&again));
    assert_ne!(handle_of(&first), handle_of(&other));

    assert_eq!(proxy.single_sketch(SumSketch).await?, 6);
    let cached = collect_stream(proxy.sketch(SumSketch)).await?;
    assert_eq!(cached, vec![PartialResult::complete(6)]);
    assert_eq!(service.memoized_results(), 3);
    Ok(())
}

#[tokio::test]
async fn memoization_can_be_disabled() -> Result<()> {
    let config = ServiceConfig {
        memoize: false,
        ..Default::default()
    };
    let (service, proxy) = hosted("local://no-memo", int_leaves(&[1, 2]), config)?;

    let first = proxy.single_map(IncrementMap { by: 1 }).await?;
    let again = proxy.single_map(IncrementMap { by: 1 }).await?;
    assert_ne!(handle_of(&first), handle_of(&again));
    assert_eq!(service.memoized_results(), 0);
    Ok(())
}

#[tokio::test]
async fn purge_and_toggle_control_messages() -> Result<()> {
    let (service, proxy) = hosted("local://purge", int_leaves(&[1, 2]), ServiceConfig::default())?;
    proxy.single_sketch(SumSketch).await?;
    assert_eq!(service.memoized_results(), 1);

    let statuses = proxy.single_manage(Arc::new(PurgeMemoization)).await?;
    assert_eq!(statuses.results(), vec!["purged 1 memoized results"]);
    assert_eq!(service.memoized_results(), 0);

    let statuses = proxy.single_manage(Arc::new(ToggleMemoization)).await?;
    assert_eq!(statuses.results(), vec!["memoization disabled"]);
    assert!(!service.is_memoizing());

    proxy.single_sketch(SumSketch).await?;
    assert_eq!(service.memoized_results(), 0);
    Ok(())
}

#[tokio::test]
async fn delete_all_datasets_keeps_the_root() -> Result<()> {
    let (service, proxy) = hosted("local://delete", int_leaves(&[1, 2]), ServiceConfig::default())?;
    let mapped = proxy.single_map(ScaleMap { factor: 3 }).await?;
    assert_eq!(service.dataset_count(), 2);

    let statuses = proxy.single_manage(Arc::new(DeleteAllDatasets)).await?;
    assert_eq!(statuses.results(), vec!["deleted 1 datasets"]);
    assert_eq!(service.dataset_count(), 1);

    let err = mapped.single_sketch(SumSketch).await.unwrap_err();
    assert!(remote_error(&err).contains("does not exist"));

    // the memoized handle died with its dataset
    let remapped = proxy.single_map(ScaleMap { factor: 3 }).await?;
    assert_ne!(handle_of(&remapped), handle_of(&mapped));
    assert_eq!(remapped.single_sketch(SumSketch).await?, 9);
    Ok(())
}

#[tokio::test]
async fn deleted_datasets_are_not_answered_from_memo() -> Result<()> {
    let (service, proxy) = hosted("local://delete-memo", int_leaves(&[1, 2]), ServiceConfig::default())?;
    let mapped = proxy.single_map(ScaleMap { factor: 3 }).await?;
    assert_eq!(mapped.single_sketch(SumSketch).await?, 9);
    assert_eq!(proxy.single_sketch(SumSketch).await?, 3);
    assert!(service.memoized_results() >= 3);

    proxy.single_manage(Arc::new(DeleteAllDatasets)).await?;
    assert_eq!(service.dataset_count(), 1);
    assert_eq!(service.memoized_results(), 0);

    let err = mapped.single_sketch(SumSketch).await.unwrap_err();
    assert!(remote_error(&err).contains("does not exist"));
    assert_eq!(proxy.single_sketch(SumSketch).await?, 3);
    Ok(())
}

#[tokio::test]
async fn remote_walk_reports_remote_leaves() -> Result<()> {
    let (_service, proxy) = hosted("local://walk", int_leaves(&[1, 2, 3]), ServiceConfig::default())?;

    let statuses = proxy.single_manage(Arc::new(FailingLeafMessage)).await?;
    assert_eq!(statuses.failures().count(), 3);

    let mixed = Dataset::parallel(vec![Dataset::local(10i64), proxy]);
    let statuses = mixed.single_manage(Arc::new(CountLeaves)).await?;
    assert_eq!(statuses.len(), 4);
    assert_eq!(mixed.single_sketch(SumSketch).await?, 16);
    Ok(())
}

#[tokio::test]
async fn shut_down_service_refuses_requests() -> Result<()> {
    let (service, proxy) = hosted("local://shutdown", int_leaves(&[1]), ServiceConfig::default())?;
    service.shutdown();

    let err = proxy.single_sketch(SumSketch).await.unwrap_err();
    assert!(remote_error(&err).contains("cancelled"));
    Ok(())
}
