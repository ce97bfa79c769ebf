//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PROSPECTOR__*` 覆盖
//! （双下划线表示嵌套，如 `PROSPECTOR__QUOTA__DAILY_REVEAL_LIMIT=1000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub quota: QuotaSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub callback: CallbackSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [engine] 段：调度与回收节奏、批大小、在途超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 调度循环间隔（秒）
    pub dispatch_interval_secs: u64,
    /// 超时回收循环间隔（秒）
    pub sweep_interval_secs: u64,
    /// 在途请求超时（秒），超过则 Contact 退回 New
    pub pending_timeout_secs: u64,
    /// 单批条数（供应商上限 100，超出会被钳制）
    pub batch_size: usize,
    /// 单轮提交上限；0 = 不额外限制（配额仍是硬门）
    pub rate_per_run: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: 60,
            sweep_interval_secs: 120,
            pending_timeout_secs: 1800,
            batch_size: 100,
            rate_per_run: 0,
        }
    }
}

/// [quota] 段：三个独立 scope 的限额
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaSection {
    pub daily_reveal_limit: u64,
    pub daily_profile_view_limit: u64,
    pub per_minute_limit: u64,
}

impl Default for QuotaSection {
    fn default() -> Self {
        Self {
            daily_reveal_limit: 5000,
            daily_profile_view_limit: 5000,
            per_minute_limit: 600,
        }
    }
}

/// [provider] 段：端点、超时与提交重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// 提交失败的最大重试次数（不含首次）
    pub max_retries: u32,
    /// 重试退避基数（毫秒，线性递增）
    pub retry_backoff_ms: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.reveal-provider.example".to_string(),
            request_timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// [callback] 段：回调校验令牌与 Webhook 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackSection {
    /// 来源校验令牌；None 则不校验
    pub verify_token: Option<String>,
    pub bind_addr: String,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            verify_token: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// [store] 段：快照文件路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub snapshot_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/contacts.json"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PROSPECTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PROSPECTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PROSPECTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
