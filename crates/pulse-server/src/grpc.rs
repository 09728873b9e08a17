//! gRPC ingestion: a single `UpdateMetrics` method guarded by a
//! trusted-subnet check on the `x-real-ip` metadata.

use ip_network::IpNetwork;
use pulse_common::proto::metrics_server::Metrics;
use pulse_common::proto::{UpdateMetricsRequest, UpdateMetricsResponse};
use pulse_common::types::Metric;
use pulse_storage::MetricStore;
use std::net::IpAddr;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

pub struct MetricsService {
    storage: Arc<dyn MetricStore>,
}

impl MetricsService {
    pub fn new(storage: Arc<dyn MetricStore>) -> Self {
        Self { storage }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        let metrics = convert_request(request.into_inner())?;
        let count = metrics.len();

        self.storage
            .update_batch(metrics)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        tracing::debug!(count, "metrics ingested over grpc");
        Ok(Response::new(UpdateMetricsResponse {}))
    }
}

fn convert_request(request: UpdateMetricsRequest) -> Result<Vec<Metric>, Status> {
    if request.metrics.is_empty() {
        return Err(Status::invalid_argument("metrics list is empty"));
    }
    request
        .metrics
        .into_iter()
        .map(|wire| Metric::try_from(wire).map_err(|e| Status::invalid_argument(e.to_string())))
        .collect()
}

/// Source check for gRPC ingestion. The configured value is either a CIDR
/// network or a bare IP (treated as an exact host match); with nothing
/// configured every caller is rejected, so enabling the gRPC server implies
/// configuring the subnet.
#[derive(Debug, Clone, Default)]
pub struct SubnetGuard {
    allowed: Option<IpNetwork>,
}

impl SubnetGuard {
    pub fn new(trusted: &str) -> anyhow::Result<Self> {
        if trusted.is_empty() {
            return Ok(Self { allowed: None });
        }
        let allowed = if let Ok(network) = trusted.parse::<IpNetwork>() {
            network
        } else {
            let ip: IpAddr = trusted
                .parse()
                .map_err(|_| anyhow::anyhow!("trusted subnet '{trusted}' is neither CIDR nor IP"))?;
            match ip {
                IpAddr::V4(v4) => IpNetwork::new(v4, 32)?,
                IpAddr::V6(v6) => IpNetwork::new(v6, 128)?,
            }
        };
        Ok(Self {
            allowed: Some(allowed),
        })
    }

    pub fn check(&self, metadata: &MetadataMap) -> Result<(), Status> {
        let ip_str = metadata
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::permission_denied("missing source ip"))?;

        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| Status::permission_denied("invalid source ip"))?;

        match &self.allowed {
            Some(network) if network.contains(ip) => Ok(()),
            _ => Err(Status::permission_denied(
                "permission denied for source ip",
            )),
        }
    }

    /// tonic interceptor wrapping [`SubnetGuard::check`].
    pub fn into_interceptor(
        self,
    ) -> impl FnMut(Request<()>) -> Result<Request<()>, Status> + Clone {
        move |request: Request<()>| {
            self.check(request.metadata())?;
            Ok(request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with_ip(ip: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert("x-real-ip", ip.parse().unwrap());
        metadata
    }

    #[test]
    fn missing_source_ip_is_denied() {
        let guard = SubnetGuard::new("10.0.0.0/8").unwrap();
        let status = guard.check(&MetadataMap::new()).unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(status.message(), "missing source ip");
    }

    #[test]
    fn subnet_containment_admits_and_rejects() {
        let guard = SubnetGuard::new("10.0.0.0/8").unwrap();
        assert!(guard.check(&metadata_with_ip("10.1.2.3")).is_ok());
        assert!(guard.check(&metadata_with_ip("192.168.0.1")).is_err());
    }

    #[test]
    fn bare_ip_is_exact_host_match() {
        let guard = SubnetGuard::new("192.168.0.7").unwrap();
        assert!(guard.check(&metadata_with_ip("192.168.0.7")).is_ok());
        assert!(guard.check(&metadata_with_ip("192.168.0.8")).is_err());
    }

    #[test]
    fn unconfigured_guard_rejects_everyone() {
        let guard = SubnetGuard::new("").unwrap();
        assert!(guard.check(&metadata_with_ip("10.0.0.1")).is_err());
    }

    #[test]
    fn invalid_configuration_is_fatal() {
        assert!(SubnetGuard::new("not-a-subnet").is_err());
    }
}
