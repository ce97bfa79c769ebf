//! Reveal 编排错误类型
//!
//! 与各组件配合：ProviderSubmissionFailed 有界重试、CallbackValidationError
//! 拒收不落库、StoreWriteConflict 重读后按键重试。配额耗尽与未知 requestId
//! 不是错误：前者经 DispatchReport.deferred 上报，后者是幂等空操作
//! （IngestOutcome::IgnoredUnknown）。

use thiserror::Error;

/// Reveal 编排过程中可能出现的错误（提交、回调、存储）
#[derive(Error, Debug)]
pub enum RevealError {
    #[error("Provider submission failed: {0}")]
    ProviderSubmissionFailed(String),

    /// 回调形态/来源非法：拒收，不产生任何存储变更
    #[error("Callback validation error: {0}")]
    CallbackValidationError(String),

    /// 行版本冲突：携带最新读重试，不中止整体流程
    #[error("Store write conflict for provider id {0}")]
    StoreWriteConflict(String),

    #[error("Store error: {0}")]
    StoreError(String),
}
