//! 强度缩放.

use log::debug;

use super::history::TransformHistory;
use super::Transform;
use crate::consts::{LIVER_TUMOR_HU_MAX, LIVER_TUMOR_HU_MIN};
use crate::data::DataRecord;
use crate::error::{SegError, SegResult};

/// 将 `[a_min, a_max]` 内的强度线性映射到 `[b_min, b_max]`.
///
/// 映射为 `b_min + (v - a_min) / (a_max - a_min) * (b_max - b_min)`. 源区间可以反向
/// (`a_min > a_max`), 但不能退化. 开启 `clip` 时, 结果截断到 `b_min` 与 `b_max` 之间,
/// `NaN` 原样保留. 几何形状不变, 因此不写变换历史.
#[derive(Debug, Clone)]
pub struct ScaleIntensityRange {
    key: String,
    a_min: f32,
    a_max: f32,
    b_min: f32,
    b_max: f32,
    clip: bool,
}

impl ScaleIntensityRange {
    /// 构建强度缩放阶段. 源区间的合法性在执行时检查.
    pub fn new(key: &str, a_min: f32, a_max: f32, b_min: f32, b_max: f32, clip: bool) -> Self {
        Self {
            key: key.to_owned(),
            a_min,
            a_max,
            b_min,
            b_max,
            clip,
        }
    }

    /// 肝脏/肿瘤模型所用的 `[-21, 189] -> [0, 1]`, 截断.
    #[inline]
    pub fn liver_tumor(key: &str) -> Self {
        Self::new(key, LIVER_TUMOR_HU_MIN, LIVER_TUMOR_HU_MAX, 0.0, 1.0, true)
    }
}

impl Transform for ScaleIntensityRange {
    fn name(&self) -> &'static str {
        "ScaleIntensityRange"
    }

    fn apply(&self, mut record: DataRecord, _: &TransformHistory) -> SegResult<DataRecord> {
        let (a_min, a_max) = (self.a_min, self.a_max);
        if !a_min.is_finite() || !a_max.is_finite() || a_min == a_max {
            return Err(SegError::stage(
                self.name(),
                format!("源区间 [{a_min}, {a_max}] 不合法"),
            ));
        }
        let vol = record.take_volume(self.name(), &self.key)?;
        debug!(
            "ScaleIntensityRange `{}`: [{}, {}] -> [{}, {}]",
            self.key, self.a_min, self.a_max, self.b_min, self.b_max
        );

        let (b_min, b_max, clip) = (self.b_min, self.b_max, self.clip);
        let span = a_max - a_min;
        let data = vol.data().mapv(|v| {
            let t = (v - a_min) / span;
            let t = if clip && !t.is_nan() {
                num::clamp(t, 0.0, 1.0)
            } else {
                t
            };
            b_min + t * (b_max - b_min)
        });
        let out = vol.with_data(data);
        record.insert_volume(&self.key, out);
        Ok(record)
    }
}
