//! 领域模型：联系人、状态生命周期与回调载荷
//!
//! Contact 以供应商签发的稳定标识（ProviderId）作为去重键；
//! 状态机：New → RevealRequested → {Revealed, NoContactsFound}，
//! RevealRequested 仅可经超时回收回到 New。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 供应商签发的稳定人员标识（系统全局去重键）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 提交 Reveal 请求时供应商返回的请求标识，用于回调关联
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 联系人状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactStatus {
    /// 初始状态，可被调度提交
    New,
    /// 已提交 Reveal，等待回调
    RevealRequested,
    /// 回调带回联系方式
    Revealed,
    /// 回调确认供应商无此人联系方式
    NoContactsFound,
}

/// 联系人记录（每个 ProviderId 恰好一行）
///
/// version 为乐观并发控制的行版本号：upsert 时必须携带读到的版本，
/// 版本不匹配返回 StoreWriteConflict，由调用方重读后重试。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub provider_id: ProviderId,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    pub status: ContactStatus,
    pub last_updated: DateTime<Utc>,
    /// 来源检索会话标识（由搜索侧写入，本核心只透传）
    #[serde(default)]
    pub search_session: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl Contact {
    /// 新建一条待处理记录
    pub fn new(provider_id: ProviderId, name: impl Into<String>) -> Self {
        Self {
            provider_id,
            name: name.into(),
            title: None,
            company: None,
            location: None,
            emails: Vec::new(),
            phones: Vec::new(),
            profile_url: None,
            status: ContactStatus::New,
            last_updated: Utc::now(),
            search_session: None,
            version: 0,
        }
    }
}

/// Reveal 结果（回调载荷解析后的内部表示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevealResult {
    /// 找到联系方式
    ContactFound {
        emails: Vec<String>,
        phones: Vec<String>,
        profile_url: Option<String>,
    },
    /// 确认无联系方式
    NoContactsFound,
}

/// 回调投递的线上形态（供应商 POST 给我们的 JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackDelivery {
    pub request_id: String,
    /// "revealed" 或 "not_found"
    pub status: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_new_defaults() {
        let c = Contact::new(ProviderId::new("p-1"), "Alice");
        assert_eq!(c.status, ContactStatus::New);
        assert!(c.emails.is_empty());
        assert_eq!(c.version, 0);
    }

    #[test]
    fn test_delivery_deserialize_minimal() {
        let raw = r#"{"request_id":"r-1","status":"not_found"}"#;
        let d: CallbackDelivery = serde_json::from_str(raw).unwrap();
        assert_eq!(d.request_id, "r-1");
        assert_eq!(d.status, "not_found");
        assert!(d.emails.is_empty());
        assert!(d.profile_url.is_none());
    }
}
