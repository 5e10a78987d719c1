//! 几何变换历史.
//!
//! 改变几何形状的阶段在执行时追加一条 [`TraceEntry`], 之后由 `Invert`
//! 阶段按逆序读取并还原. 历史以记录的身份标识为键, 只追加不修改.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use super::resample::InterpMode;
use crate::data::{Geometry, RecordId};
use crate::Idx3d;

/// 一次几何变换的记录, 包含还原它所需的全部状态.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEntry {
    /// 重采样.
    Spacing {
        /// 被变换的键.
        key: String,
        /// 变换前的空间形状.
        orig_shape: Idx3d,
        /// 变换前的几何描述.
        orig_geometry: Geometry,
        /// 正向重采样时使用的插值方式.
        mode: InterpMode,
    },

    /// 前景裁剪. 裁剪区间为 `[start, end)`.
    CropForeground {
        /// 被变换的键.
        key: String,
        /// 变换前的空间形状.
        orig_shape: Idx3d,
        /// 变换前的几何描述.
        orig_geometry: Geometry,
        /// 包围盒起点 (含).
        start: Idx3d,
        /// 包围盒终点 (不含).
        end: Idx3d,
    },
}

impl TraceEntry {
    /// 被变换的键.
    #[inline]
    pub fn key(&self) -> &str {
        match self {
            TraceEntry::Spacing { key, .. } | TraceEntry::CropForeground { key, .. } => key,
        }
    }

    /// 变换名.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            TraceEntry::Spacing { .. } => "Spacing",
            TraceEntry::CropForeground { .. } => "CropForeground",
        }
    }
}

/// 只追加的几何变换历史, 由一条流水线独占, 通过 `Arc` 共享给 `Invert`.
///
/// 历史不会清理已登记的记录, 条目数随经过流水线的记录个数增长.
/// 流水线应按次构建: 每次推理使用新的流水线, 推理结束后随之释放.
#[derive(Debug, Default)]
pub struct TransformHistory {
    log: Mutex<HashMap<RecordId, Vec<TraceEntry>>>,
}

impl TransformHistory {
    /// 创建空历史.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RecordId, Vec<TraceEntry>>> {
        self.log.lock()
    }

    /// 登记记录 `id` 经过了该流水线. 已登记的记录不受影响.
    pub fn register(&self, id: RecordId) {
        self.lock().entry(id).or_default();
    }

    /// 为记录 `id` 追加一条变换.
    pub fn push(&self, id: RecordId, entry: TraceEntry) {
        self.lock().entry(id).or_default().push(entry);
    }

    /// 记录 `id` 的全部变换, 按执行顺序排列.
    ///
    /// 若该记录从未经过该流水线, 则返回 `None`.
    pub fn entries(&self, id: RecordId) -> Option<Vec<TraceEntry>> {
        self.lock().get(&id).cloned()
    }

    /// 已登记的记录个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 是否没有任何登记的记录.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
