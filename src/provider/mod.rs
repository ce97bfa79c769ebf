//! 补全供应商客户端抽象与实现（HTTP / Mock）

mod http;
mod mock;
mod traits;

pub use http::HttpProviderClient;
pub use mock::MockProviderClient;
pub use traits::ProviderClient;

use std::sync::Arc;

use crate::config::AppConfig;

/// 根据配置与环境变量选择供应商后端（HTTP / Mock）
pub fn create_provider_from_config(cfg: &AppConfig) -> Arc<dyn ProviderClient> {
    match std::env::var("REVEAL_API_KEY") {
        Ok(key) if !key.is_empty() => {
            tracing::info!(base_url = %cfg.provider.base_url, "Using HTTP reveal provider");
            Arc::new(HttpProviderClient::new(
                &cfg.provider.base_url,
                &key,
                cfg.provider.request_timeout_secs,
            ))
        }
        _ => {
            tracing::warn!("REVEAL_API_KEY not set, using Mock provider");
            Arc::new(MockProviderClient::new())
        }
    }
}
