//! Prospector - 销售线索联系方式补全系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 配额跟踪、请求关联、批量调度、回调摄入、状态对账、引擎装配与优雅关闭
//! - **model**: 联系人与回调载荷的领域模型
//! - **observability**: 日志初始化与引擎计数器
//! - **provider**: 补全供应商客户端抽象与实现（HTTP / Mock）
//! - **store**: 按 ProviderId 去重的联系人存储与 JSON 快照持久化

pub mod config;
pub mod core;
pub mod model;
pub mod observability;
pub mod provider;
pub mod store;
