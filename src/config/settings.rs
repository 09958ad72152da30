use crate::provider::RetryPolicy;
use crate::session::WaitTimeouts;
use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub api: ApiConfig,
    pub proxy: ProxyConfig,
    pub translate: TranslateConfig,
    pub session: SessionConfig,
    pub waits: WaitConfig,
    pub retry: RetryConfig,
    pub limits: LimitConfig,
    pub commands: CommandConfig,
    pub points: PointsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub model: String,
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp-image-generation".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route direct provider calls through a raw HTTP proxy. Ignored
    /// while the proxy service is in use.
    pub enable_proxy: bool,
    pub proxy_url: String,
    /// Replace the provider base URL with an intermediary service that
    /// re-exposes the same path shape.
    pub use_proxy_service: bool,
    pub proxy_service_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    pub enable: bool,
    pub api_base: String,
    pub model: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            enable: true,
            api_base: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            model: "glm-4-flash".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub conversation_expire_seconds: u64,
    pub max_conversation_messages: usize,
    pub image_cache_timeout_seconds: u64,
    pub temp_file_max_age_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation_expire_seconds: 180,
            max_conversation_messages: 10,
            image_cache_timeout_seconds: 300,
            temp_file_max_age_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub reference_seconds: u64,
    pub merge_seconds: u64,
    pub reverse_seconds: u64,
    pub analysis_seconds: u64,
    pub follow_up_seconds: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            reference_seconds: 180,
            merge_seconds: 180,
            reverse_seconds: 180,
            analysis_seconds: 180,
            follow_up_seconds: 180,
        }
    }
}

impl WaitConfig {
    pub fn timeouts(&self) -> WaitTimeouts {
        WaitTimeouts {
            reverse: Duration::from_secs(self.reverse_seconds),
            analysis: Duration::from_secs(self.analysis_seconds),
            reference: Duration::from_secs(self.reference_seconds),
            merge: Duration::from_secs(self.merge_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicyConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Retry policies differ per operation kind; the constants are
/// configuration, deliberately not unified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub generate: RetryPolicyConfig,
    pub edit: RetryPolicyConfig,
    pub analysis: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            generate: RetryPolicyConfig {
                max_retries: 15,
                initial_delay_ms: 1000,
                multiplier: 1.5,
                max_delay_ms: 10_000,
            },
            edit: RetryPolicyConfig {
                max_retries: 10,
                initial_delay_ms: 1000,
                multiplier: 1.5,
                max_delay_ms: 10_000,
            },
            analysis: RetryPolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Serialized request ceiling; oversize payloads are rebuilt without
    /// history.
    pub max_request_bytes: usize,
    pub request_timeout_seconds: u64,
    pub history_image_max_edge: u32,
    pub history_image_quality: u8,
    pub current_image_max_edge: u32,
    pub current_image_quality: u8,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 4 * 1024 * 1024,
            request_timeout_seconds: 60,
            history_image_max_edge: 800,
            history_image_quality: 85,
            current_image_max_edge: 800,
            current_image_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub generate: Vec<String>,
    pub edit: Vec<String>,
    pub reference_edit: Vec<String>,
    pub merge: Vec<String>,
    pub image_reverse: Vec<String>,
    pub image_analysis: Vec<String>,
    pub follow_up: Vec<String>,
    pub exit_session: Vec<String>,
    pub translate_on: Vec<String>,
    pub translate_off: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            generate: words(&["/imagine", "/generate"]),
            edit: words(&["/edit"]),
            reference_edit: words(&["/reference"]),
            merge: words(&["/merge"]),
            image_reverse: words(&["/reverse"]),
            image_analysis: words(&["/describe", "/analyze"]),
            follow_up: words(&["/followup"]),
            exit_session: words(&["/end"]),
            translate_on: words(&["/translate on"]),
            translate_off: words(&["/translate off"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    pub enable_points: bool,
    pub generate_cost: u32,
    pub edit_cost: u32,
    pub analysis_cost: u32,
    pub reverse_cost: u32,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            enable_points: false,
            generate_cost: 10,
            edit_cost: 15,
            analysis_cost: 5,
            reverse_cost: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Provider API key, supplied only through the environment.
    pub fn api_key() -> Result<String> {
        env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))
    }

    /// Translation API key; translation silently stays off without one.
    pub fn translate_api_key() -> Option<String> {
        env::var("TRANSLATE_API_KEY").ok()
    }
}
