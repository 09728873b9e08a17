use pulse_common::proto::metrics_server::Metrics;
use pulse_common::proto::{self, UpdateMetricsRequest};
use pulse_common::types::MetricValue;
use pulse_server::grpc::{MetricsService, SubnetGuard};
use pulse_storage::MetricStore;
use tempfile::TempDir;
use tonic::Request;

fn test_storage(dir: &TempDir) -> std::sync::Arc<dyn MetricStore> {
    pulse_storage::open("", dir.path().join("snapshot.json").to_str().unwrap(), false).unwrap()
}

fn wire_metric(id: &str, kind: proto::metric::Kind, delta: i64, value: f64) -> proto::Metric {
    proto::Metric {
        id: id.to_string(),
        r#type: kind as i32,
        delta,
        value,
    }
}

fn request_with_ip(metrics: Vec<proto::Metric>, ip: Option<&str>) -> Request<UpdateMetricsRequest> {
    let mut request = Request::new(UpdateMetricsRequest { metrics });
    if let Some(ip) = ip {
        request.metadata_mut().insert("x-real-ip", ip.parse().unwrap());
    }
    request
}

#[tokio::test]
async fn batch_update_converts_and_stores() {
    let dir = TempDir::new().unwrap();
    let storage = test_storage(&dir);
    let service = MetricsService::new(storage.clone());

    let request = request_with_ip(
        vec![
            wire_metric("C", proto::metric::Kind::Counter, 5, 0.0),
            wire_metric("G", proto::metric::Kind::Gauge, 0, 1.5),
        ],
        None,
    );
    service.update_metrics(request).await.unwrap();

    let counter = storage.get_metric("C").await.unwrap().unwrap();
    assert_eq!(counter.value, MetricValue::Counter(5));
    let gauge = storage.get_metric("G").await.unwrap().unwrap();
    assert_eq!(gauge.value, MetricValue::Gauge(1.5));
}

#[tokio::test]
async fn counter_deltas_accumulate_across_calls() {
    let dir = TempDir::new().unwrap();
    let storage = test_storage(&dir);
    let service = MetricsService::new(storage.clone());

    for _ in 0..2 {
        let request = request_with_ip(
            vec![wire_metric("C", proto::metric::Kind::Counter, 3, 0.0)],
            None,
        );
        service.update_metrics(request).await.unwrap();
    }

    let counter = storage.get_metric("C").await.unwrap().unwrap();
    assert_eq!(counter.value, MetricValue::Counter(6));
}

#[tokio::test]
async fn empty_batch_is_invalid() {
    let dir = TempDir::new().unwrap();
    let service = MetricsService::new(test_storage(&dir));

    let status = service
        .update_metrics(request_with_ip(Vec::new(), None))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn interceptor_denies_requests_without_source_ip() {
    let guard = SubnetGuard::new("10.0.0.0/8").unwrap();
    let mut interceptor = guard.into_interceptor();

    let status = interceptor(Request::new(())).unwrap_err();
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
    assert_eq!(status.message(), "missing source ip");
}

#[tokio::test]
async fn interceptor_applies_cidr_containment() {
    let guard = SubnetGuard::new("10.0.0.0/8").unwrap();
    let mut interceptor = guard.into_interceptor();

    let mut inside = Request::new(());
    inside
        .metadata_mut()
        .insert("x-real-ip", "10.20.30.40".parse().unwrap());
    assert!(interceptor(inside).is_ok());

    let mut outside = Request::new(());
    outside
        .metadata_mut()
        .insert("x-real-ip", "192.168.1.1".parse().unwrap());
    let status = interceptor(outside).unwrap_err();
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
}
