//! 联系人快照持久化
//!
//! 将存储内容写入/从 JSON 文件加载，用于进程重启后的状态恢复（可选使用）。

use std::path::Path;

use crate::model::Contact;

/// 简单的文件持久化：单文件 JSON 数组
#[derive(Debug)]
pub struct ContactPersistence {
    path: std::path::PathBuf,
}

impl ContactPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 从 JSON 文件加载；文件不存在时返回空 Vec
    pub fn load(&self) -> anyhow::Result<Vec<Contact>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let contacts: Vec<Contact> = serde_json::from_str(&data)?;
        Ok(contacts)
    }

    /// 写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, contacts: &[Contact]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(contacts)?)?;
        Ok(())
    }
}
