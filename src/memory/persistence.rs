//! 会话快照持久化
//!
//! 每个会话一个 JSON 文件，只保存用量计数与 vitals（不含原始 Turn 历史）；
//! 仅在 turn 成功完成后写入，读取时对 strain 按经过时间做衰减。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{SessionVitals, UsageCounters};

/// 落盘的会话快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub usage: UsageCounters,
    pub vitals: SessionVitals,
    pub saved_at: DateTime<Utc>,
}

/// 文件快照存储：<dir>/<session_id>.json
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// 写入快照；目录不存在时自动创建，先写临时文件再 rename
    pub fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&snapshot.session_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// 读取快照并按 half_life_secs 衰减 strain；文件不存在时返回 None
    pub fn load(
        &self,
        session_id: &str,
        half_life_secs: u64,
    ) -> anyhow::Result<Option<SessionSnapshot>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        let mut snapshot: SessionSnapshot = serde_json::from_str(&data)?;
        let elapsed = (Utc::now() - snapshot.saved_at).num_milliseconds() as f64 / 1000.0;
        snapshot.vitals.decay(elapsed, half_life_secs);
        Ok(Some(snapshot))
    }
}
