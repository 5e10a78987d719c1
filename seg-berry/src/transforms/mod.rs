//! 流水线阶段 (变换).
//!
//! 每个阶段都实现统一的 [`Transform`] 接口: 读取记录中的一个或多个键,
//! 写入一个或多个键. 改变几何形状的阶段 (`Spacing`, `CropForeground`)
//! 还会向所在流水线的 [`TransformHistory`] 追加记录, 以便 [`Invert`] 还原.
//!
//! 流水线以 [`Stage`] 枚举存放阶段, 通过 `match` 静态分发.

use crate::data::DataRecord;
use crate::error::SegResult;

mod history;
mod intensity;
mod invert;
mod io;
mod post;
pub mod resample;
mod spatial;

pub use history::{TraceEntry, TransformHistory};
pub use intensity::ScaleIntensityRange;
pub use invert::Invert;
pub use io::{LoadImage, OutputDtype, SaveImage};
pub use post::{Activations, AsDiscrete};
pub use resample::InterpMode;
pub use spatial::{CropForeground, Spacing};
pub(crate) use spatial::pad_to;
pub use io::meta_key_of;

/// 流水线阶段的统一接口.
pub trait Transform {
    /// 阶段名, 用于日志和错误信息.
    fn name(&self) -> &'static str;

    /// 对 `record` 施加该阶段.
    ///
    /// `history` 是正在执行该阶段的流水线的变换历史.
    fn apply(&self, record: DataRecord, history: &TransformHistory) -> SegResult<DataRecord>;
}

/// 流水线阶段. 各变体分别包装一个具体阶段.
#[derive(Debug, Clone)]
pub enum Stage {
    /// 将框架图像加载为体数据.
    LoadImage(LoadImage),
    /// 重采样到目标体素分辨率.
    Spacing(Spacing),
    /// 强度范围缩放.
    ScaleIntensityRange(ScaleIntensityRange),
    /// 前景裁剪.
    CropForeground(CropForeground),
    /// 激活函数.
    Activations(Activations),
    /// 离散化.
    AsDiscrete(AsDiscrete),
    /// 几何变换还原.
    Invert(Invert),
    /// 保存中间结果.
    SaveImage(SaveImage),
}

macro_rules! dispatch {
    ($self: expr, $s: ident => $e: expr) => {
        match $self {
            Stage::LoadImage($s) => $e,
            Stage::Spacing($s) => $e,
            Stage::ScaleIntensityRange($s) => $e,
            Stage::CropForeground($s) => $e,
            Stage::Activations($s) => $e,
            Stage::AsDiscrete($s) => $e,
            Stage::Invert($s) => $e,
            Stage::SaveImage($s) => $e,
        }
    };
}

impl Transform for Stage {
    #[inline]
    fn name(&self) -> &'static str {
        dispatch!(self, s => s.name())
    }

    #[inline]
    fn apply(&self, record: DataRecord, history: &TransformHistory) -> SegResult<DataRecord> {
        dispatch!(self, s => s.apply(record, history))
    }
}

macro_rules! impl_into_stage {
    ($($t: ident),+) => {
        $(
            impl From<$t> for Stage {
                #[inline]
                fn from(s: $t) -> Self {
                    Stage::$t(s)
                }
            }
        )+
    };
}

impl_into_stage!(
    LoadImage,
    Spacing,
    ScaleIntensityRange,
    CropForeground,
    Activations,
    AsDiscrete,
    Invert,
    SaveImage
);

impl Stage {
    /// 该阶段是否会改变几何形状 (从而需要被还原).
    #[inline]
    pub fn is_geometric(&self) -> bool {
        matches!(self, Stage::Spacing(_) | Stage::CropForeground(_))
    }
}
