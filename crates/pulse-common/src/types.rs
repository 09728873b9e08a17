use crate::proto;
use serde::{Deserialize, Serialize};

/// The two metric kinds the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(format!("unknown metric kind: {s}")),
        }
    }
}

/// Errors produced when decoding a metric from its wire form.
#[derive(Debug, thiserror::Error)]
pub enum MetricDecodeError {
    #[error("invalid metric type '{0}'")]
    InvalidKind(String),

    #[error("gauge '{0}' is missing its value")]
    MissingValue(String),

    #[error("counter '{0}' is missing its delta")]
    MissingDelta(String),
}

/// A metric sample. Gauges carry an absolute value and replace on update;
/// counters carry a signed delta and accumulate on update.
///
/// The JSON form is the historical wire shape:
/// `{"id": "...", "type": "gauge", "value": 1.5}` or
/// `{"id": "...", "type": "counter", "delta": 3}` — exactly one of
/// `value`/`delta` present. Decoding a payload that violates that shape
/// fails, which the server surfaces as a client error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricPayload", into = "MetricPayload")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self.value {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Bare value rendering used by the plain-text read endpoint.
    pub fn format_value(&self) -> String {
        match self.value {
            MetricValue::Gauge(v) => format!("{v}"),
            MetricValue::Counter(d) => format!("{d}"),
        }
    }
}

/// Raw wire shape with nullable payload fields; conversions to and from
/// [`Metric`] carry the validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetricPayload {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl TryFrom<MetricPayload> for Metric {
    type Error = MetricDecodeError;

    fn try_from(payload: MetricPayload) -> Result<Self, Self::Error> {
        let kind: MetricKind = payload
            .kind
            .parse()
            .map_err(|_| MetricDecodeError::InvalidKind(payload.kind.clone()))?;
        match kind {
            MetricKind::Gauge => {
                let value = payload
                    .value
                    .ok_or_else(|| MetricDecodeError::MissingValue(payload.id.clone()))?;
                Ok(Metric::gauge(payload.id, value))
            }
            MetricKind::Counter => {
                let delta = payload
                    .delta
                    .ok_or_else(|| MetricDecodeError::MissingDelta(payload.id.clone()))?;
                Ok(Metric::counter(payload.id, delta))
            }
        }
    }
}

impl From<Metric> for MetricPayload {
    fn from(metric: Metric) -> Self {
        match metric.value {
            MetricValue::Gauge(v) => MetricPayload {
                id: metric.id,
                kind: MetricKind::Gauge.to_string(),
                delta: None,
                value: Some(v),
            },
            MetricValue::Counter(d) => MetricPayload {
                id: metric.id,
                kind: MetricKind::Counter.to_string(),
                delta: Some(d),
                value: None,
            },
        }
    }
}

impl From<&Metric> for proto::Metric {
    fn from(metric: &Metric) -> Self {
        match metric.value {
            MetricValue::Gauge(v) => proto::Metric {
                id: metric.id.clone(),
                r#type: proto::metric::Kind::Gauge as i32,
                delta: 0,
                value: v,
            },
            MetricValue::Counter(d) => proto::Metric {
                id: metric.id.clone(),
                r#type: proto::metric::Kind::Counter as i32,
                delta: d,
                value: 0.0,
            },
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = MetricDecodeError;

    fn try_from(wire: proto::Metric) -> Result<Self, Self::Error> {
        let kind = proto::metric::Kind::try_from(wire.r#type)
            .map_err(|_| MetricDecodeError::InvalidKind(wire.r#type.to_string()))?;
        match kind {
            proto::metric::Kind::Gauge => Ok(Metric::gauge(wire.id, wire.value)),
            proto::metric::Kind::Counter => Ok(Metric::counter(wire.id, wire.delta)),
        }
    }
}

/// Read-request body: names a metric without carrying a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricProbe {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// One record of the ingestion audit trail, emitted per accepted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: i64,
    #[serde(rename = "metrics")]
    pub metric_names: Vec<String>,
    #[serde(rename = "ip_address")]
    pub source_ip: String,
}
