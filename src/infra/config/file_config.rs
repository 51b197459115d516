use serde::Deserialize;

use crate::infra::config::{
    AppConfig, BackendConfig, LogConfig, RealtimeConfig, SessionConfig, SyncConfig,
};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub backend: Option<FileBackendConfig>,
    pub session: Option<FileSessionConfig>,
    pub realtime: Option<FileRealtimeConfig>,
    pub sync: Option<FileSyncConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(backend) = self.backend {
            backend.merge_into(&mut config.backend);
        }

        if let Some(session) = self.session {
            session.merge_into(&mut config.session);
        }

        if let Some(realtime) = self.realtime {
            realtime.merge_into(&mut config.realtime);
        }

        if let Some(sync) = self.sync {
            sync.merge_into(&mut config.sync);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
    pub file: Option<bool>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }

        if let Some(file) = self.file {
            config.file = file;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileBackendConfig {
    pub base_url: Option<String>,
    pub realtime_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

impl FileBackendConfig {
    fn merge_into(self, config: &mut BackendConfig) {
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }

        if let Some(realtime_url) = self.realtime_url {
            config.realtime_url = realtime_url;
        }

        if let Some(timeout_ms) = self.request_timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSessionConfig {
    pub refresh_interval_secs: Option<u64>,
    pub expiry_skew_secs: Option<i64>,
}

impl FileSessionConfig {
    fn merge_into(self, config: &mut SessionConfig) {
        if let Some(interval) = self.refresh_interval_secs {
            config.refresh_interval_secs = interval;
        }

        if let Some(skew) = self.expiry_skew_secs {
            config.expiry_skew_secs = skew;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileRealtimeConfig {
    pub liveness_interval_ms: Option<u64>,
    pub reconnect_attempts: Option<u32>,
    pub reconnect_backoff_ms: Option<u64>,
}

impl FileRealtimeConfig {
    fn merge_into(self, config: &mut RealtimeConfig) {
        if let Some(interval) = self.liveness_interval_ms {
            config.liveness_interval_ms = interval;
        }

        if let Some(attempts) = self.reconnect_attempts {
            config.reconnect_attempts = attempts;
        }

        if let Some(backoff) = self.reconnect_backoff_ms {
            config.reconnect_backoff_ms = backoff;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSyncConfig {
    pub refresh_debounce_ms: Option<u64>,
}

impl FileSyncConfig {
    fn merge_into(self, config: &mut SyncConfig) {
        if let Some(debounce) = self.refresh_debounce_ms {
            config.refresh_debounce_ms = debounce;
        }
    }
}
