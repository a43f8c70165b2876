//! 地址簿 - 规范 UUID ↔ 社区平台标识 的双向映射
//!
//! 文件格式为 YAML 映射，值可以是单个标识或标识序列：
//!
//! ```yaml
//! 6f1c...: '@alice:example.org'
//! 9a2e...:
//! - '@bob:example.org'
//! - '123456789012345678'
//! ```
//!
//! 加载后再保存会保持键顺序与值的形态（标量 / 序列、字符串 / 数字）。
//! 同一个平台标识挂在多个 UUID 下时视为歧义，`resolve` 返回 None。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::model::{FanUuid, Platform, PlatformId};

/// 值在文件中的写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Scalar,
    Sequence,
    /// `uuid:` 后面什么都没写
    Null,
}

#[derive(Debug, Clone)]
struct BookEntry {
    uuid: FanUuid,
    /// 标识及其原始 YAML 值
    ids: Vec<(PlatformId, Value)>,
    shape: Shape,
}

#[derive(Debug, Clone, Default)]
struct BookState {
    entries: Vec<BookEntry>,
    by_uuid: HashMap<FanUuid, usize>,
    by_platform: HashMap<PlatformId, Vec<FanUuid>>,
}

impl BookState {
    fn rebuild_index(&mut self) {
        self.by_uuid.clear();
        self.by_platform.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.by_uuid.insert(entry.uuid.clone(), idx);
            for (pid, _) in &entry.ids {
                let owners = self.by_platform.entry(pid.clone()).or_default();
                if !owners.contains(&entry.uuid) {
                    owners.push(entry.uuid.clone());
                }
            }
        }
    }

    fn entry(&self, uuid: &FanUuid) -> Option<&BookEntry> {
        self.by_uuid.get(uuid).map(|&idx| &self.entries[idx])
    }
}

/// 地址簿
#[derive(Debug, Default)]
pub struct AddressBook {
    /// 绑定的文件；为 None 时只在内存中
    path: Option<PathBuf>,
    state: RwLock<BookState>,
}

impl AddressBook {
    /// 内存地址簿
    pub fn new() -> Self {
        Self::default()
    }

    /// 从文件加载；文件不存在时得到一个空地址簿，之后的修改会写入该文件
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let book = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            Self::from_yaml_str(&raw)?
        } else {
            debug!("地址簿文件不存在，从空开始: {}", path.display());
            Self::new()
        };
        info!("📒 地址簿已加载: {} 个用户 ({})", book.len(), path.display());
        Ok(Self {
            path: Some(path),
            state: book.state,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let value: Value = if raw.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(raw)?
        };
        let mapping = match value {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            other => {
                return Err(SyncError::InvalidData(format!(
                    "地址簿顶层必须是映射: {:?}",
                    other
                )))
            }
        };

        let mut state = BookState::default();
        for (key, value) in mapping {
            let uuid = FanUuid::new(scalar_text(&key).ok_or_else(|| {
                SyncError::InvalidData(format!("地址簿键必须是标量: {:?}", key))
            })?);
            let (raw_ids, shape) = match value {
                Value::Sequence(seq) => (seq, Shape::Sequence),
                Value::Null => (Vec::new(), Shape::Null),
                scalar => (vec![scalar], Shape::Scalar),
            };
            let mut ids = Vec::with_capacity(raw_ids.len());
            for raw in raw_ids {
                let text = scalar_text(&raw).ok_or_else(|| {
                    SyncError::InvalidData(format!("{} 的标识必须是标量: {:?}", uuid, raw))
                })?;
                ids.push((PlatformId::new(text), raw));
            }
            if state.by_uuid.contains_key(&uuid) {
                return Err(SyncError::InvalidData(format!("地址簿中 {} 重复", uuid)));
            }
            state.by_uuid.insert(uuid.clone(), state.entries.len());
            state.entries.push(BookEntry { uuid, ids, shape });
        }
        state.rebuild_index();

        Ok(Self {
            path: None,
            state: RwLock::new(state),
        })
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        let state = self.state.read();
        Self::render(&state)
    }

    fn render(state: &BookState) -> Result<String> {
        let mut mapping = Mapping::new();
        for entry in &state.entries {
            let value = match (entry.shape, entry.ids.as_slice()) {
                (Shape::Scalar, [(_, raw)]) => raw.clone(),
                (Shape::Null, []) => Value::Null,
                _ => Value::Sequence(entry.ids.iter().map(|(_, raw)| raw.clone()).collect()),
            };
            mapping.insert(Value::String(entry.uuid.to_string()), value);
        }
        Ok(serde_yaml::to_string(&Value::Mapping(mapping))?)
    }

    /// 写入指定文件
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let rendered = self.to_yaml_string()?;
        write_atomic(path.as_ref(), &rendered)
    }

    /// 写回加载时的文件
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Err(SyncError::Config("内存地址簿没有绑定文件".to_string())),
        }
    }

    /// 平台标识 → 规范 UUID；未映射或有歧义时返回 None
    pub fn resolve(&self, platform_id: &PlatformId) -> Option<FanUuid> {
        let state = self.state.read();
        let owners = state.by_platform.get(platform_id)?;
        match owners.as_slice() {
            [uuid] => Some(uuid.clone()),
            [] => None,
            many => {
                warn!("⚠️ 标识 {} 映射到 {} 个用户，视为未映射", platform_id, many.len());
                None
            }
        }
    }

    /// 与 `resolve` 相同，但区分未映射与歧义
    pub fn resolve_strict(&self, platform_id: &PlatformId) -> Result<FanUuid> {
        let state = self.state.read();
        match state.by_platform.get(platform_id).map(Vec::as_slice) {
            Some([uuid]) => Ok(uuid.clone()),
            Some(many) if many.len() > 1 => Err(SyncError::UnresolvedIdentity(format!(
                "{} 映射到 {} 个用户",
                platform_id,
                many.len()
            ))),
            _ => Err(SyncError::UnresolvedIdentity(format!("{} 没有绑定用户", platform_id))),
        }
    }

    /// 用户在指定平台上的全部标识（保持文件中的顺序）
    pub fn linked_ids(&self, uuid: &FanUuid, platform: Platform) -> Vec<PlatformId> {
        let state = self.state.read();
        state
            .entry(uuid)
            .map(|e| {
                e.ids
                    .iter()
                    .map(|(pid, _)| pid)
                    .filter(|pid| platform.owns(pid))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 地址簿中的全部用户（保持文件中的顺序）
    pub fn uuids(&self) -> Vec<FanUuid> {
        self.state.read().entries.iter().map(|e| e.uuid.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 绑定；已存在时不做任何事并返回 false。绑定到文件时先落盘，成功后才生效。
    pub fn link(&self, uuid: &FanUuid, platform_id: &PlatformId) -> Result<bool> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let raw = Value::String(platform_id.to_string());
        match next.by_uuid.get(uuid) {
            Some(&idx) => {
                let entry = &mut next.entries[idx];
                if entry.ids.iter().any(|(pid, _)| pid == platform_id) {
                    return Ok(false);
                }
                entry.ids.push((platform_id.clone(), raw));
                entry.shape = Shape::Sequence;
            }
            None => next.entries.push(BookEntry {
                uuid: uuid.clone(),
                ids: vec![(platform_id.clone(), raw)],
                shape: Shape::Sequence,
            }),
        }
        next.rebuild_index();

        self.persist(&next)?;
        *state = next;
        info!("🔗 绑定 {} → {}", uuid, platform_id);
        Ok(true)
    }

    /// 解绑；用户没有剩余标识时整项删除
    pub fn unlink(&self, uuid: &FanUuid, platform_id: &PlatformId) -> Result<bool> {
        let mut state = self.state.write();
        let Some(&idx) = state.by_uuid.get(uuid) else {
            return Ok(false);
        };
        let mut next = state.clone();
        let entry = &mut next.entries[idx];
        let before = entry.ids.len();
        entry.ids.retain(|(pid, _)| pid != platform_id);
        if entry.ids.len() == before {
            return Ok(false);
        }
        if entry.ids.is_empty() {
            next.entries.remove(idx);
        }
        next.rebuild_index();

        self.persist(&next)?;
        *state = next;
        info!("✂️ 解绑 {} → {}", uuid, platform_id);
        Ok(true)
    }

    fn persist(&self, state: &BookState) -> Result<()> {
        if let Some(path) = &self.path {
            let rendered = Self::render(state)?;
            write_atomic(path, &rendered)?;
        }
        Ok(())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
