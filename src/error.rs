use thiserror::Error;

/// One device-identifying handle shared by the breaker, the field-bus client and
/// the pipelines. A plant's PCC meter and its ESS are distinct devices even
/// though they share a `plant_id`, so the id carries a device-class tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Logger(i64),
    Ess(i64),
    EnvironmentSensor(i64),
    Pod(String),
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceId::Logger(id) => write!(f, "logger:{id}"),
            DeviceId::Ess(id) => write!(f, "ess:{id}"),
            DeviceId::EnvironmentSensor(id) => write!(f, "env-sensor:{id}"),
            DeviceId::Pod(pod) => write!(f, "pod:{pod}"),
        }
    }
}

/// A field-bus operation that failed, carried on [`DeviceIoError`] for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldBusOp {
    Read,
    WriteSingle,
    WriteMulti,
}

impl std::fmt::Display for FieldBusOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldBusOp::Read => "read",
            FieldBusOp::WriteSingle => "write_single",
            FieldBusOp::WriteMulti => "write_multi",
        };
        f.write_str(s)
    }
}

/// Opaque failure from the field-bus client (§4.2). Every pyModbusTCP-style
/// "refused connection / timeout / short read / exception response" collapses
/// into this single variant; the distinctions don't change what a pipeline does
/// with it (record breaker failure, skip device, continue).
#[derive(Debug, Error)]
#[error("device io error: device={device} op={op} endpoint={endpoint} ({source})")]
pub struct DeviceIoError {
    pub device: DeviceId,
    pub op: FieldBusOp,
    pub endpoint: String,
    #[source]
    pub source: anyhow::Error,
}

impl DeviceIoError {
    pub fn new(
        device: DeviceId,
        op: FieldBusOp,
        endpoint: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            device,
            op,
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }
}

/// Configuration-time failures (§7 taxonomy 4). Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing register descriptor: {0}")]
    MissingDescriptor(String),
    #[error("failed to parse register descriptor {path}: {source}")]
    ParseDescriptor {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown vendor tag: {0}")]
    UnknownVendor(String),
}
