use serde::Deserialize;

/// Top-level configuration settings shared by the broker, server and worker processes.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub streams: StreamSettings,
    pub correlator: CorrelatorSettings,
    pub worker: WorkerSettings,
    pub log: LogSettings,
}

/// Front-end HTTP server settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub upload_dir: String,
    pub request_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

/// Stream broker settings.
///
/// `host`/`port` are where the broker process listens, `url` is where clients
/// connect to it. Retention limits apply to the broker process only.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub url: String,
    pub data_dir: String,
    pub max_entries_per_stream: Option<usize>,
    pub entry_ttl_secs: Option<i64>,
}

/// Names of the two streams and their consumer groups.
#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    pub request_stream: String,
    pub request_group: String,
    pub response_stream: String,
    pub response_group: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrelatorSettings {
    pub consumer_name: String,
    pub poll_interval_ms: u64,
    pub result_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    pub consumer_name: Option<String>,
    pub server_url: String,
    pub reclaim_idle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every section and field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub streams: Option<PartialStreamSettings>,
    pub correlator: Option<PartialCorrelatorSettings>,
    pub worker: Option<PartialWorkerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upload_dir: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub data_dir: Option<String>,
    pub max_entries_per_stream: Option<usize>,
    pub entry_ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStreamSettings {
    pub request_stream: Option<String>,
    pub request_group: Option<String>,
    pub response_stream: Option<String>,
    pub response_group: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialCorrelatorSettings {
    pub consumer_name: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub result_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialWorkerSettings {
    pub consumer_name: Option<String>,
    pub server_url: Option<String>,
    pub reclaim_idle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let streams = self.streams.unwrap_or_default();
        let correlator = self.correlator.unwrap_or_default();
        let worker = self.worker.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                upload_dir: server.upload_dir.unwrap_or(default.server.upload_dir),
                request_timeout_secs: server
                    .request_timeout_secs
                    .unwrap_or(default.server.request_timeout_secs),
                max_upload_bytes: server
                    .max_upload_bytes
                    .unwrap_or(default.server.max_upload_bytes),
            },
            broker: BrokerSettings {
                host: broker.host.unwrap_or(default.broker.host),
                port: broker.port.unwrap_or(default.broker.port),
                url: broker.url.unwrap_or(default.broker.url),
                data_dir: broker.data_dir.unwrap_or(default.broker.data_dir),
                max_entries_per_stream: broker
                    .max_entries_per_stream
                    .or(default.broker.max_entries_per_stream),
                entry_ttl_secs: broker.entry_ttl_secs.or(default.broker.entry_ttl_secs),
            },
            streams: StreamSettings {
                request_stream: streams
                    .request_stream
                    .unwrap_or(default.streams.request_stream),
                request_group: streams
                    .request_group
                    .unwrap_or(default.streams.request_group),
                response_stream: streams
                    .response_stream
                    .unwrap_or(default.streams.response_stream),
                response_group: streams
                    .response_group
                    .unwrap_or(default.streams.response_group),
            },
            correlator: CorrelatorSettings {
                consumer_name: correlator
                    .consumer_name
                    .unwrap_or(default.correlator.consumer_name),
                poll_interval_ms: correlator
                    .poll_interval_ms
                    .unwrap_or(default.correlator.poll_interval_ms),
                result_ttl_secs: correlator
                    .result_ttl_secs
                    .unwrap_or(default.correlator.result_ttl_secs),
                sweep_interval_secs: correlator
                    .sweep_interval_secs
                    .unwrap_or(default.correlator.sweep_interval_secs),
            },
            worker: WorkerSettings {
                consumer_name: worker.consumer_name.or(default.worker.consumer_name),
                server_url: worker.server_url.unwrap_or(default.worker.server_url),
                reclaim_idle_ms: worker.reclaim_idle_ms.or(default.worker.reclaim_idle_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Stream and group names match the ones the Python deployment created, so a
/// mixed rollout reads from the same streams.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 65011,
                upload_dir: "uploads".to_string(),
                request_timeout_secs: 10,
                max_upload_bytes: 64 * 1024 * 1024,
            },
            broker: BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: 6380,
                url: "ws://127.0.0.1:6380".to_string(),
                data_dir: "wordcount_db".to_string(),
                max_entries_per_stream: Some(10_000),
                entry_ttl_secs: Some(86_400),
            },
            streams: StreamSettings {
                request_stream: "server_to_worker_stream".to_string(),
                request_group: "server_to_worker".to_string(),
                response_stream: "worker_to_server_stream".to_string(),
                response_group: "worker_to_server".to_string(),
            },
            correlator: CorrelatorSettings {
                consumer_name: "consumer".to_string(),
                poll_interval_ms: 50,
                result_ttl_secs: 300,
                sweep_interval_secs: 30,
            },
            worker: WorkerSettings {
                consumer_name: None,
                server_url: "http://127.0.0.1:65011".to_string(),
                reclaim_idle_ms: None,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
