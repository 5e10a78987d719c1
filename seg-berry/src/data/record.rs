//! 流水线中流动的键值数据记录.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Image, Volume};
use crate::error::{SegError, SegResult};

/// 自由格式的字符串元信息.
pub type MetaDict = BTreeMap<String, String>;

/// 数据记录的身份标识. 每个新建的记录都会获得进程内唯一的标识.
///
/// 变换历史以该标识为键, 因此克隆出的记录与原记录共享同一份历史.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RecordId(u64);

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(0);

impl RecordId {
    fn next() -> Self {
        Self(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始数值.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// 数据记录中的一项.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// 尚未加载的框架图像.
    Image(Image),

    /// 通道优先的体数据.
    Volume(Volume),

    /// 辅助元信息.
    Meta(MetaDict),
}

impl Entry {
    /// 该项的种类名, 用于错误信息.
    pub fn kind(&self) -> &'static str {
        match self {
            Entry::Image(_) => "image",
            Entry::Volume(_) => "volume",
            Entry::Meta(_) => "meta",
        }
    }
}

/// 字符串键到 [`Entry`] 的映射. 键是贯穿整个流水线的稳定标识.
///
/// 阶段只通过写入键来修改记录, 从不原地修改已有的 `Volume`.
#[derive(Debug, Clone)]
pub struct DataRecord {
    id: RecordId,
    entries: HashMap<String, Entry>,
}

impl Default for DataRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl DataRecord {
    /// 创建空记录并分配新的身份标识.
    pub fn new() -> Self {
        Self {
            id: RecordId::next(),
            entries: HashMap::new(),
        }
    }

    /// 创建仅包含 `key -> image` 一项的记录.
    pub fn from_image(key: &str, image: Image) -> Self {
        let mut ans = Self::new();
        ans.insert(key, Entry::Image(image));
        ans
    }

    /// 身份标识.
    #[inline]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// 写入 `key`. 若已存在则返回旧值.
    #[inline]
    pub fn insert(&mut self, key: &str, entry: Entry) -> Option<Entry> {
        self.entries.insert(key.to_owned(), entry)
    }

    /// 写入体数据.
    #[inline]
    pub fn insert_volume(&mut self, key: &str, volume: Volume) -> Option<Entry> {
        self.insert(key, Entry::Volume(volume))
    }

    /// 取出 `key` 对应的项.
    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// 读取 `key` 对应的项.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// 是否包含 `key`.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 项数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有键, 无顺序保证.
    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 以阶段 `stage` 的名义读取 `key` 上的体数据.
    ///
    /// 键不存在或该项不是体数据时返回 `SegError::Stage`.
    pub fn volume(&self, stage: &'static str, key: &str) -> SegResult<&Volume> {
        match self.entries.get(key) {
            Some(Entry::Volume(v)) => Ok(v),
            Some(other) => Err(SegError::stage(
                stage,
                format!("键 `{key}` 上是 {}, 而不是 volume", other.kind()),
            )),
            None => Err(SegError::stage(stage, format!("记录中缺少键 `{key}`"))),
        }
    }

    /// 与 [`Self::volume`] 类似, 但将体数据从记录中取出.
    pub fn take_volume(&mut self, stage: &'static str, key: &str) -> SegResult<Volume> {
        match self.entries.remove(key) {
            Some(Entry::Volume(v)) => Ok(v),
            Some(other) => {
                let kind = other.kind();
                self.entries.insert(key.to_owned(), other);
                Err(SegError::stage(
                    stage,
                    format!("键 `{key}` 上是 {kind}, 而不是 volume"),
                ))
            }
            None => Err(SegError::stage(stage, format!("记录中缺少键 `{key}`"))),
        }
    }

    /// 以阶段 `stage` 的名义取出 `key` 上的框架图像.
    pub fn take_image(&mut self, stage: &'static str, key: &str) -> SegResult<Image> {
        match self.entries.remove(key) {
            Some(Entry::Image(img)) => Ok(img),
            Some(other) => {
                let kind = other.kind();
                self.entries.insert(key.to_owned(), other);
                Err(SegError::stage(
                    stage,
                    format!("键 `{key}` 上是 {kind}, 而不是 image"),
                ))
            }
            None => Err(SegError::stage(stage, format!("记录中缺少键 `{key}`"))),
        }
    }

    /// 读取 `key` 上的元信息. 不存在或种类不符时返回 `None`.
    #[inline]
    pub fn meta(&self, key: &str) -> Option<&MetaDict> {
        match self.entries.get(key) {
            Some(Entry::Meta(m)) => Some(m),
            _ => None,
        }
    }
}
