//! 几何变换还原.
//!
//! 预处理流水线在执行时记录每一个改变几何形状的阶段, `Invert` 读取同一记录的历史,
//! 按逆序把模型输出还原到原始图像的网格上.

use std::sync::Arc;

use log::{debug, info};

use super::history::{TraceEntry, TransformHistory};
use super::resample::{resample_channels, InterpMode};
use super::spatial::pad_to;
use super::Transform;
use crate::data::{DataRecord, Volume, VolumeAttr};
use crate::error::{SegError, SegResult};
use crate::pipeline::Pipeline;

/// 以预处理流水线 `pre` 中记录 `orig_key` 的几何变换为依据, 逆向变换 `key` 上的体数据.
///
/// 记录从未经过 `pre` 时返回 `SegError::Stage`. 经过了 `pre` 但没有几何变换时不做任何事.
#[derive(Debug, Clone)]
pub struct Invert {
    key: String,
    pre: Arc<Pipeline>,
    orig_key: String,
    nearest_interp: bool,
}

impl Invert {
    /// 构建还原阶段.
    ///
    /// `nearest_interp` 为 `true` 时, 重采样的逆变换一律使用最近邻插值.
    pub fn new(key: &str, pre: Arc<Pipeline>, orig_key: &str, nearest_interp: bool) -> Self {
        Self {
            key: key.to_owned(),
            pre,
            orig_key: orig_key.to_owned(),
            nearest_interp,
        }
    }

    fn undo(&self, vol: Volume, entry: &TraceEntry) -> SegResult<Volume> {
        let out = match entry {
            TraceEntry::CropForeground {
                orig_shape,
                orig_geometry,
                start,
                end,
                ..
            } => {
                let cropped = (end.0 - start.0, end.1 - start.1, end.2 - start.2);
                if vol.shape() != cropped {
                    return Err(SegError::stage(
                        self.name(),
                        format!(
                            "无法还原裁剪: 当前形状 {:?} 与裁剪后的形状 {:?} 不一致",
                            vol.shape(),
                            cropped
                        ),
                    ));
                }
                Volume::new(pad_to(vol.data(), *orig_shape, *start), *orig_geometry)
            }
            TraceEntry::Spacing {
                orig_shape,
                orig_geometry,
                mode,
                ..
            } => {
                let mode = if self.nearest_interp {
                    InterpMode::Nearest
                } else {
                    *mode
                };
                let (data, _) = vol.into_parts();
                Volume::new(resample_channels(&data, *orig_shape, mode), *orig_geometry)
            }
        };
        debug!("Invert `{}`: undo {} -> {:?}", self.key, entry.name(), out.shape());
        Ok(out)
    }
}

impl Transform for Invert {
    fn name(&self) -> &'static str {
        "Invert"
    }

    fn apply(&self, mut record: DataRecord, _: &TransformHistory) -> SegResult<DataRecord> {
        let Some(entries) = self.pre.history().entries(record.id()) else {
            return Err(SegError::stage(
                self.name(),
                format!("记录 #{} 从未经过预处理流水线", record.id().get()),
            ));
        };
        let mut vol = record.take_volume(self.name(), &self.key)?;
        let mut n = 0;
        for entry in entries.iter().rev().filter(|e| e.key() == self.orig_key) {
            vol = self.undo(vol, entry)?;
            n += 1;
        }
        info!(
            "Invert `{}`: undid {n} geometric transform(s) of `{}`",
            self.key, self.orig_key
        );
        record.insert_volume(&self.key, vol);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Entry, Geometry};
    use crate::transforms::{CropForeground, ScaleIntensityRange, Spacing};
    use ndarray::Array4;

    fn make_record() -> (DataRecord, Geometry) {
        let g = Geometry::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let mut data = Array4::<f32>::zeros((1, 5, 8, 8));
        for z in 1..4 {
            for h in 2..6 {
                for w in 3..7 {
                    data[[0, z, h, w]] = 1.0;
                }
            }
        }
        let mut r = DataRecord::new();
        r.insert("image", Entry::Volume(Volume::new(data, g)));
        (r, g)
    }

    #[test]
    fn test_invert_restores_shape_and_geometry() {
        let pre = Arc::new(Pipeline::new(vec![
            Spacing::liver_tumor("image").into(),
            CropForeground::new("image", "image").into(),
        ]));
        let (r, g) = make_record();
        let mut r = pre.apply(r).unwrap();
        let processed = r.volume("test", "image").unwrap();
        let labels = processed.data().mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });
        let pred = processed.with_data(labels);
        assert_eq!(pre.history().entries(r.id()).unwrap().len(), 2);

        r.insert_volume("pred", pred);
        let h = TransformHistory::new();
        let r = Invert::new("pred", pre, "image", true).apply(r, &h).unwrap();
        let out = r.volume("test", "pred").unwrap();
        assert_eq!(out.shape(), (5, 8, 8));
        assert_eq!(out.geometry(), &g);
        assert!(out.data().iter().all(|v| *v == 0.0 || *v == 1.0));
        assert_eq!(out.data()[[0, 2, 4, 4]], 1.0);
        assert_eq!(out.data()[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_invert_without_geometric_stages_is_identity() {
        let pre = Arc::new(Pipeline::new(vec![
            ScaleIntensityRange::new("image", 0.0, 1.0, 0.0, 1.0, true).into(),
        ]));
        let (r, _) = make_record();
        let mut r = pre.apply(r).unwrap();
        let v = r.volume("test", "image").unwrap().clone();
        r.insert_volume("pred", v.clone());
        let h = TransformHistory::new();
        let r = Invert::new("pred", pre, "image", true).apply(r, &h).unwrap();
        assert_eq!(r.volume("test", "pred").unwrap(), &v);
    }

    #[test]
    fn test_invert_unknown_record_is_stage_error() {
        let pre = Arc::new(Pipeline::new(vec![]));
        let (mut r, _) = make_record();
        let v = r.volume("test", "image").unwrap().clone();
        r.insert_volume("pred", v);
        let h = TransformHistory::new();
        let err = Invert::new("pred", pre, "image", true)
            .apply(r, &h)
            .unwrap_err();
        assert!(err.is_stage());
    }

    #[test]
    fn test_invert_crop_shape_mismatch() {
        let pre = Arc::new(Pipeline::new(vec![
            CropForeground::new("image", "image").into(),
        ]));
        let (r, g) = make_record();
        let mut r = pre.apply(r).unwrap();
        r.insert_volume("pred", Volume::new(Array4::zeros((1, 2, 2, 2)), g));
        let h = TransformHistory::new();
        let err = Invert::new("pred", pre, "image", true)
            .apply(r, &h)
            .unwrap_err();
        assert!(err.is_stage());
    }
}
