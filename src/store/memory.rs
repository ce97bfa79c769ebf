//! 内存实现：Arc<RwLock<HashMap>> + 行版本号
//!
//! 每行带 version，upsert 做 compare-and-swap：版本不匹配返回
//! StoreWriteConflict。两个并发回调对同一 ProviderId 的合并因此串行化。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::RevealError;
use crate::model::{Contact, ContactStatus, ProviderId};
use crate::store::ContactStore;

/// 内存联系人存储
#[derive(Clone, Default)]
pub struct InMemoryContactStore {
    rows: Arc<RwLock<HashMap<ProviderId, Contact>>>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从快照装载（启动恢复）；快照内同键后者覆盖前者
    pub async fn load_snapshot(&self, contacts: Vec<Contact>) {
        let mut rows = self.rows.write().await;
        for c in contacts {
            rows.insert(c.provider_id.clone(), c);
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn find_by_provider_id(&self, id: &ProviderId) -> Option<Contact> {
        self.rows.read().await.get(id).cloned()
    }

    async fn upsert(&self, mut contact: Contact) -> Result<(), RevealError> {
        let mut rows = self.rows.write().await;
        match rows.get(&contact.provider_id) {
            Some(existing) if existing.version != contact.version => {
                return Err(RevealError::StoreWriteConflict(
                    contact.provider_id.to_string(),
                ));
            }
            Some(_) | None => {
                contact.version += 1;
                rows.insert(contact.provider_id.clone(), contact);
            }
        }
        Ok(())
    }

    async fn query_by_status(&self, status: ContactStatus) -> Vec<Contact> {
        let rows = self.rows.read().await;
        let mut out: Vec<Contact> = rows
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.last_updated);
        out
    }

    async fn snapshot(&self) -> Vec<Contact> {
        let mut out: Vec<Contact> = self.rows.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.provider_id.0.cmp(&b.provider_id.0));
        out
    }
}
