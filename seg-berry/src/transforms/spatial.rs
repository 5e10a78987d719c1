//! 改变几何形状的阶段: 重采样和前景裁剪.

use log::debug;
use ndarray::{s, Array4, ArrayView4};

use super::history::{TraceEntry, TransformHistory};
use super::resample::{resample_channels, InterpMode};
use super::Transform;
use crate::consts::LIVER_TUMOR_PIXDIM;
use crate::data::{DataRecord, Volume, VolumeAttr};
use crate::error::{SegError, SegResult};
use crate::Idx3d;

/// 将 `key` 上的体数据重采样到目标体素分辨率 `pixdim` (`[z, h, w]`, 毫米).
///
/// 新形状的每个轴为 `max(1, round(n * spacing / pixdim))`.
#[derive(Debug, Clone)]
pub struct Spacing {
    key: String,
    pixdim: [f64; 3],
    mode: InterpMode,
}

impl Spacing {
    /// 构建重采样阶段.
    ///
    /// `pixdim` 的每个分量必须是正有限值, 否则返回 `None`.
    pub fn new(key: &str, pixdim: [f64; 3], mode: InterpMode) -> Option<Self> {
        pixdim
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
            .then(|| Self {
                key: key.to_owned(),
                pixdim,
                mode,
            })
    }

    /// 1mm 各向同性, 三线性插值.
    #[inline]
    pub fn liver_tumor(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            pixdim: LIVER_TUMOR_PIXDIM,
            mode: InterpMode::Linear,
        }
    }

    /// 对形状为 `shape`, 分辨率为 `spacing` 的数据, 计算重采样后的形状.
    pub fn output_shape(&self, (z, h, w): Idx3d, spacing: [f64; 3]) -> Idx3d {
        let f = |n: usize, axis: usize| -> usize {
            let v = (n as f64 * spacing[axis] / self.pixdim[axis]).round();
            (v as usize).max(1)
        };
        (f(z, 0), f(h, 1), f(w, 2))
    }
}

impl Transform for Spacing {
    fn name(&self) -> &'static str {
        "Spacing"
    }

    fn apply(&self, mut record: DataRecord, history: &TransformHistory) -> SegResult<DataRecord> {
        let vol = record.take_volume(self.name(), &self.key)?;
        if vol.is_empty() {
            return Err(SegError::stage(self.name(), "无法对空体数据重采样"));
        }
        let orig_shape = vol.shape();
        let orig_geometry = *vol.geometry();
        let out_shape = self.output_shape(orig_shape, orig_geometry.spacing());
        debug!(
            "Spacing `{}`: {:?} @ {:?} -> {:?} @ {:?}",
            self.key,
            orig_shape,
            orig_geometry.spacing(),
            out_shape,
            self.pixdim
        );

        let Some(geometry) = orig_geometry.with_spacing(self.pixdim) else {
            return Err(SegError::stage(self.name(), "目标体素分辨率不合法"));
        };
        let (data, _) = vol.into_parts();
        let data = resample_channels(&data, out_shape, self.mode);

        history.push(
            record.id(),
            TraceEntry::Spacing {
                key: self.key.clone(),
                orig_shape,
                orig_geometry,
                mode: self.mode,
            },
        );
        record.insert_volume(&self.key, Volume::new(data, geometry));
        Ok(record)
    }
}

/// 以 `source_key` 上的前景 (任一通道值大于 `threshold` 的体素) 包围盒裁剪 `key` 上的体数据.
///
/// 包围盒在每个方向扩展 `margin` 个体素, 并截断到数据范围内.
#[derive(Debug, Clone)]
pub struct CropForeground {
    key: String,
    source_key: String,
    margin: usize,
    threshold: f32,
}

impl CropForeground {
    /// 以 `source_key` 的正值区域裁剪 `key`, 无扩展.
    pub fn new(key: &str, source_key: &str) -> Self {
        Self {
            key: key.to_owned(),
            source_key: source_key.to_owned(),
            margin: 0,
            threshold: 0.0,
        }
    }

    /// 设置包围盒扩展量.
    #[inline]
    pub fn with_margin(mut self, margin: usize) -> Self {
        self.margin = margin;
        self
    }

    /// 设置前景阈值.
    #[inline]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

/// 求 `data` 中满足 `v > threshold` 的体素的包围盒 `[start, end)`.
///
/// 若不存在前景, 则返回 `None`.
pub fn foreground_bbox(data: ArrayView4<f32>, threshold: f32) -> Option<(Idx3d, Idx3d)> {
    let (_, z, h, w) = data.dim();
    let mut start = (z, h, w);
    let mut end = (0, 0, 0);
    for ((_, z, h, w), v) in data.indexed_iter() {
        if *v > threshold {
            start = (start.0.min(z), start.1.min(h), start.2.min(w));
            end = (end.0.max(z + 1), end.1.max(h + 1), end.2.max(w + 1));
        }
    }
    (end.0 > start.0 && end.1 > start.1 && end.2 > start.2).then_some((start, end))
}

/// 将 `data` 置于形状为 `shape` 的零数组中以 `start` 为起点的位置.
///
/// `start + data.shape` 超出 `shape` 时程序 panic.
pub fn pad_to(data: ArrayView4<f32>, shape: Idx3d, start: Idx3d) -> Array4<f32> {
    let (c, dz, dh, dw) = data.dim();
    let (z0, h0, w0) = start;
    let mut out = Array4::<f32>::zeros((c, shape.0, shape.1, shape.2));
    out.slice_mut(s![.., z0..z0 + dz, h0..h0 + dh, w0..w0 + dw])
        .assign(&data);
    out
}

impl Transform for CropForeground {
    fn name(&self) -> &'static str {
        "CropForeground"
    }

    fn apply(&self, mut record: DataRecord, history: &TransformHistory) -> SegResult<DataRecord> {
        let (start, end) = {
            let source = record.volume(self.name(), &self.source_key)?;
            let target = record.volume(self.name(), &self.key)?;
            if source.shape() != target.shape() {
                return Err(SegError::stage(
                    self.name(),
                    format!(
                        "`{}` 的形状 {:?} 与 `{}` 的形状 {:?} 不一致",
                        self.source_key,
                        source.shape(),
                        self.key,
                        target.shape()
                    ),
                ));
            }
            let Some((start, end)) = foreground_bbox(source.data(), self.threshold) else {
                return Err(SegError::stage(self.name(), "前景包围盒不包含任何体素"));
            };
            let (z, h, w) = source.shape();
            let m = self.margin;
            (
                (
                    start.0.saturating_sub(m),
                    start.1.saturating_sub(m),
                    start.2.saturating_sub(m),
                ),
                ((end.0 + m).min(z), (end.1 + m).min(h), (end.2 + m).min(w)),
            )
        };

        let vol = record.take_volume(self.name(), &self.key)?;
        let orig_shape = vol.shape();
        let orig_geometry = *vol.geometry();
        debug!(
            "CropForeground `{}`: {:?} -> [{:?}, {:?})",
            self.key, orig_shape, start, end
        );

        let data = vol
            .data()
            .slice(s![.., start.0..end.0, start.1..end.1, start.2..end.2])
            .to_owned();
        history.push(
            record.id(),
            TraceEntry::CropForeground {
                key: self.key.clone(),
                orig_shape,
                orig_geometry,
                start,
                end,
            },
        );
        record.insert_volume(&self.key, Volume::new(data, orig_geometry.cropped(start)));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Entry, Geometry};
    use ndarray::{Axis, Zip};

    /// 计数所有通道均为 0 的体素个数.
    fn count_zero_voxels(data: ArrayView4<f32>) -> usize {
        let mut n = 0;
        Zip::from(data.lanes(Axis(0))).for_each(|lane| {
            if lane.iter().all(|v| *v == 0.0) {
                n += 1;
            }
        });
        n
    }

    fn record_with(vol: Volume) -> DataRecord {
        let mut r = DataRecord::new();
        r.insert("image", Entry::Volume(vol));
        r
    }

    #[test]
    fn test_spacing_output_shape() {
        let s = Spacing::new("image", [1.0, 1.0, 1.0], InterpMode::Linear).unwrap();
        assert_eq!(s.output_shape((10, 20, 30), [2.5, 0.7, 1.0]), (25, 14, 30));
        assert_eq!(s.output_shape((1, 1, 1), [0.1, 0.1, 0.1]), (1, 1, 1));
        assert!(Spacing::new("image", [0.0, 1.0, 1.0], InterpMode::Linear).is_none());
    }

    #[test]
    fn test_spacing_records_history() {
        let g = Geometry::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let vol = Volume::new(Array4::from_elem((1, 4, 6, 6), 3.0), g);
        let r = record_with(vol);
        let id = r.id();
        let h = TransformHistory::new();
        let r = Spacing::liver_tumor("image").apply(r, &h).unwrap();

        let out = r.volume("test", "image").unwrap();
        assert_eq!(out.shape(), (8, 6, 6));
        assert_eq!(out.pix_dim(), [1.0, 1.0, 1.0]);
        assert!(out.data().iter().all(|v| (*v - 3.0).abs() < 1e-6));

        let entries = h.entries(id).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            &entries[0],
            TraceEntry::Spacing { orig_shape: (4, 6, 6), orig_geometry, .. } if *orig_geometry == g
        ));
    }

    #[test]
    fn test_crop_foreground_bbox_and_margin() {
        let mut data = Array4::<f32>::zeros((1, 6, 7, 8));
        data[[0, 2, 3, 4]] = 1.0;
        data[[0, 3, 4, 6]] = 0.5;
        let vol = Volume::new(data, Geometry::default());
        assert_eq!(
            foreground_bbox(vol.data(), 0.0),
            Some(((2, 3, 4), (4, 5, 7)))
        );

        let h = TransformHistory::new();
        let r = CropForeground::new("image", "image")
            .with_margin(1)
            .apply(record_with(vol), &h)
            .unwrap();
        let out = r.volume("test", "image").unwrap();
        assert_eq!(out.shape(), (4, 4, 5));
        assert_eq!(out.geometry().origin(), [3.0, 2.0, 1.0]);
        assert_eq!(out.data()[[0, 1, 1, 1]], 1.0);
    }

    #[test]
    fn test_crop_foreground_empty_is_stage_error() {
        let vol = Volume::new(Array4::zeros((1, 3, 3, 3)), Geometry::default());
        let h = TransformHistory::new();
        let err = CropForeground::new("image", "image")
            .apply(record_with(vol), &h)
            .unwrap_err();
        assert!(err.is_stage());
    }

    #[test]
    fn test_pad_to_inverts_crop() {
        let data = Array4::from_shape_fn((2, 2, 2, 2), |(c, z, h, w)| (c + z + h + w + 1) as f32);
        let padded = pad_to(data.view(), (4, 5, 6), (1, 2, 3));
        assert_eq!(padded.dim(), (2, 4, 5, 6));
        assert_eq!(
            padded.slice(s![.., 1..3, 2..4, 3..5]).to_owned(),
            data
        );
        assert_eq!(count_zero_voxels(padded.view()), 4 * 5 * 6 - 8);
    }
}
