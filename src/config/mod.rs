mod settings;

pub use settings::{
    ApiConfig, CommandConfig, LimitConfig, LoggingConfig, PointsConfig, ProxyConfig, RetryConfig,
    RetryPolicyConfig, SessionConfig, Settings, TranslateConfig, WaitConfig,
};
