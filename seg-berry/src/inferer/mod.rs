//! 滑动窗口推理.
//!
//! 模型只接受固定大小 (ROI) 的输入, 而预处理后的 CT 体数据通常大得多.
//! [`SlidingWindowInferer`] 以给定重叠比例在体数据上滑动 ROI 窗口, 将窗口
//! 分批交给模型, 再把重叠的窗口预测按权重融合成与输入空间形状相同的稠密得分.
//!
//! 比 ROI 小的轴先对称地以 0 填充到 ROI 大小, 输出时再裁剪回原始形状.
//!
//! 开启 `rayon` feature 时, 至多 `max_parallel_batches` 个批次同时推理;
//! 它们的结果仍由单一写者按窗口顺序累加, 因此融合结果与串行执行逐位一致.

use std::sync::Arc;

use log::{debug, info};
use ndarray::{s, Array3, Array4, Array5, ArrayView4, Axis, CowArray, Ix4, Zip};

use crate::consts::{LIVER_TUMOR_OVERLAP, LIVER_TUMOR_ROI};
use crate::data::{Volume, VolumeAttr};
use crate::error::{SegError, SegResult};
use crate::model::SegModel;
use crate::transforms::pad_to;
use crate::{Idx3d, Roi};

mod blend;
mod window;

pub use blend::{importance_map, BlendMode, SIGMA_SCALE};
pub use window::{axis_starts, padded_shape, scan_interval, window_starts};

/// 滑动窗口推理的参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InfererConfig {
    /// 窗口大小 `(z, h, w)`.
    pub roi: Roi,

    /// 相邻窗口的重叠比例, 取值 `[0, 1)`.
    pub overlap: f64,

    /// 每次交给模型的窗口个数.
    pub sw_batch_size: usize,

    /// 融合方式.
    pub blend: BlendMode,

    /// 同时推理的批次数上限. 0 表示 rayon 线程池大小. 未开启 `rayon` 时总是串行.
    pub max_parallel_batches: usize,
}

impl Default for InfererConfig {
    fn default() -> Self {
        Self {
            roi: LIVER_TUMOR_ROI,
            overlap: LIVER_TUMOR_OVERLAP,
            sw_batch_size: 1,
            blend: BlendMode::Gaussian,
            max_parallel_batches: 0,
        }
    }
}

impl InfererConfig {
    /// 设置窗口大小.
    #[inline]
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = roi;
        self
    }

    /// 设置重叠比例.
    #[inline]
    pub fn with_overlap(mut self, overlap: f64) -> Self {
        self.overlap = overlap;
        self
    }

    /// 设置批大小.
    #[inline]
    pub fn with_sw_batch_size(mut self, sw_batch_size: usize) -> Self {
        self.sw_batch_size = sw_batch_size;
        self
    }

    /// 设置融合方式.
    #[inline]
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    /// 设置同时推理的批次数上限.
    #[inline]
    pub fn with_max_parallel_batches(mut self, n: usize) -> Self {
        self.max_parallel_batches = n;
        self
    }

    /// 检查参数是否合法.
    pub fn validate(&self) -> SegResult<()> {
        let (z, h, w) = self.roi;
        if z == 0 || h == 0 || w == 0 {
            return Err(SegError::InvalidInput(format!(
                "窗口大小 {:?} 存在长度为 0 的轴",
                self.roi
            )));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(SegError::InvalidInput(format!(
                "重叠比例 {} 不在 [0, 1) 内",
                self.overlap
            )));
        }
        if self.sw_batch_size == 0 {
            return Err(SegError::InvalidInput("批大小不能为 0".into()));
        }
        Ok(())
    }

    fn parallel_batches(&self) -> usize {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                match self.max_parallel_batches {
                    0 => rayon::current_num_threads().max(1),
                    n => n,
                }
            } else {
                1
            }
        }
    }
}

/// 窗口预测的加权累加器.
struct Accumulator {
    shape: Idx3d,
    roi: Roi,
    scores: Option<Array4<f32>>,
    weights: Array3<f32>,
}

impl Accumulator {
    fn new(shape: Idx3d, roi: Roi) -> Self {
        Self {
            shape,
            roi,
            scores: None,
            weights: Array3::zeros(shape),
        }
    }

    /// 累加一个批次. 类别数由第一个批次决定.
    fn add(&mut self, starts: &[Idx3d], pred: &Array5<f32>, importance: &Array3<f32>) -> SegResult<()> {
        let classes = pred.len_of(Axis(1));
        let (z, h, w) = self.shape;
        let scores = self
            .scores
            .get_or_insert_with(|| Array4::zeros((classes, z, h, w)));
        if scores.len_of(Axis(0)) != classes {
            return Err(SegError::Inference(format!(
                "模型输出的类别数从 {} 变为 {classes}",
                scores.len_of(Axis(0))
            )));
        }

        let (rz, rh, rw) = self.roi;
        for (&(z, h, w), window) in starts.iter().zip(pred.axis_iter(Axis(0))) {
            let mut dst = scores.slice_mut(s![.., z..z + rz, h..h + rh, w..w + rw]);
            for (mut d, p) in dst.axis_iter_mut(Axis(0)).zip(window.axis_iter(Axis(0))) {
                Zip::from(&mut d)
                    .and(&p)
                    .and(importance)
                    .for_each(|d, p, w| *d += *p * *w);
            }
            let mut wdst = self.weights.slice_mut(s![z..z + rz, h..h + rh, w..w + rw]);
            wdst += importance;
        }
        Ok(())
    }

    /// `Σ w·p / Σ w`.
    fn finish(self) -> SegResult<Array4<f32>> {
        let Some(mut scores) = self.scores else {
            return Err(SegError::Internal("没有任何窗口被推理".into()));
        };
        if self.weights.iter().any(|w| *w <= 0.0) {
            return Err(SegError::Internal("存在未被任何窗口覆盖的体素".into()));
        }
        for mut ch in scores.axis_iter_mut(Axis(0)) {
            Zip::from(&mut ch)
                .and(&self.weights)
                .for_each(|s, w| *s /= *w);
        }
        Ok(scores)
    }
}

/// 滑动窗口推理器. 构建后不可修改, 可以在多次推理之间复用; 克隆的开销很小.
#[derive(Debug, Clone)]
pub struct SlidingWindowInferer {
    config: InfererConfig,
    importance: Arc<Array3<f32>>,
}

impl SlidingWindowInferer {
    /// 以 `config` 构建推理器. 参数不合法时返回 `SegError::InvalidInput`.
    pub fn new(config: InfererConfig) -> SegResult<Self> {
        config.validate()?;
        let importance = Arc::new(importance_map(config.roi, config.blend));
        Ok(Self { config, importance })
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &InfererConfig {
        &self.config
    }

    /// 对 `volume` 做滑动窗口推理, 返回 `(classes, z, h, w)` 的融合得分.
    ///
    /// 输出继承 `volume` 的几何描述. 任一批次失败时立即返回错误, 不返回部分结果.
    pub fn infer(&self, volume: &Volume, model: &dyn SegModel) -> SegResult<Volume> {
        if volume.is_empty() || volume.channels() == 0 {
            return Err(SegError::InvalidInput(format!(
                "无法对形状为 {:?} 的空体数据推理",
                volume.data().dim()
            )));
        }
        let shape = volume.shape();
        let roi = self.config.roi;
        let (padded_shape, before) = padded_shape(shape, roi);
        let padded: CowArray<f32, Ix4> = if padded_shape == shape {
            volume.data().into()
        } else {
            pad_to(volume.data(), padded_shape, before).into()
        };

        let starts = window_starts(padded_shape, roi, self.config.overlap);
        if starts.is_empty() {
            return Err(SegError::Internal(format!(
                "形状 {padded_shape:?} 上没有任何窗口"
            )));
        }
        let batches: Vec<&[Idx3d]> = starts.chunks(self.config.sw_batch_size).collect();
        let group_size = self.config.parallel_batches();
        info!(
            "Sliding window: {shape:?} (padded {padded_shape:?}), roi {roi:?}, {} windows in {} batches",
            starts.len(),
            batches.len()
        );

        let data = padded.view();
        let mut acc = Accumulator::new(padded_shape, roi);
        for (gi, group) in batches.chunks(group_size).enumerate() {
            let preds: Vec<SegResult<Array5<f32>>> = {
                cfg_if::cfg_if! {
                    if #[cfg(feature = "rayon")] {
                        use rayon::prelude::*;
                        group.par_iter().map(|b| self.predict_batch(data, b, model)).collect()
                    } else {
                        group.iter().map(|b| self.predict_batch(data, b, model)).collect()
                    }
                }
            };
            for (bi, (batch, pred)) in group.iter().zip(preds).enumerate() {
                let pred = pred?;
                debug!("batch {}: {} window(s)", gi * group_size + bi, batch.len());
                acc.add(batch, &pred, &self.importance)?;
            }
        }

        let scores = acc.finish()?;
        let scores = if padded_shape == shape {
            scores
        } else {
            let (bz, bh, bw) = before;
            let (z, h, w) = shape;
            scores
                .slice(s![.., bz..bz + z, bh..bh + h, bw..bw + w])
                .to_owned()
        };
        Ok(Volume::new(scores, *volume.geometry()))
    }

    /// 抽取 `starts` 上的窗口, 交给模型, 并检查输出形状.
    fn predict_batch(
        &self,
        data: ArrayView4<f32>,
        starts: &[Idx3d],
        model: &dyn SegModel,
    ) -> SegResult<Array5<f32>> {
        let (rz, rh, rw) = self.config.roi;
        let channels = data.len_of(Axis(0));
        let mut batch = Array5::<f32>::zeros((starts.len(), channels, rz, rh, rw));
        for (mut dst, &(z, h, w)) in batch.axis_iter_mut(Axis(0)).zip(starts) {
            dst.assign(&data.slice(s![.., z..z + rz, h..h + rh, w..w + rw]));
        }

        let pred = model.predict(batch.view()).map_err(|e| match e {
            SegError::Inference(_) => e,
            other => SegError::Inference(other.to_string()),
        })?;
        let (b, c, z, h, w) = pred.dim();
        if b != starts.len() {
            return Err(SegError::Inference(format!(
                "模型输出的批大小为 {b}, 但输入为 {}",
                starts.len()
            )));
        }
        if (z, h, w) != self.config.roi {
            return Err(SegError::Inference(format!(
                "模型输出的空间形状为 {:?}, 但窗口大小为 {:?}",
                (z, h, w),
                self.config.roi
            )));
        }
        if c == 0 {
            return Err(SegError::Inference("模型输出没有任何类别".into()));
        }
        Ok(pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Geometry;
    use ndarray::{Array, ArrayView5};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_logger() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Info)
            .init();
    }

    fn identity(batch: ArrayView5<f32>) -> SegResult<Array5<f32>> {
        Ok(batch.to_owned())
    }

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn ramp(shape: Idx3d) -> Volume {
        let (z, h, w) = shape;
        let data = Array::from_shape_fn((1, z, h, w), |(_, z, h, w)| {
            (z * 7 + h * 3 + w) as f32 * 0.01
        });
        Volume::new(data, Geometry::from_spacing([1.0, 1.0, 1.0]).unwrap())
    }

    fn inferer(roi: Roi, overlap: f64) -> SlidingWindowInferer {
        SlidingWindowInferer::new(InfererConfig::default().with_roi(roi).with_overlap(overlap)).unwrap()
    }

    #[test]
    fn test_identity_model_reconstructs_input() {
        init_logger();
        for blend in [BlendMode::Gaussian, BlendMode::Constant] {
            for (shape, roi) in [((12, 9, 10), (5, 5, 5)), ((3, 9, 4), (5, 5, 5)), ((5, 5, 5), (5, 5, 5))] {
                let cfg = InfererConfig::default()
                    .with_roi(roi)
                    .with_overlap(0.5)
                    .with_blend(blend)
                    .with_sw_batch_size(3);
                let vol = ramp(shape);
                let out = SlidingWindowInferer::new(cfg)
                    .unwrap()
                    .infer(&vol, &identity)
                    .unwrap();
                assert_eq!(out.data().dim(), vol.data().dim());
                assert_eq!(out.geometry(), vol.geometry());
                for (a, b) in out.data().iter().zip(vol.data().iter()) {
                    assert!(f32_eq(*a, *b), "{a} != {b}");
                }
            }
        }
    }

    #[test]
    fn test_small_input_single_padded_window() {
        let calls = AtomicUsize::new(0);
        let model = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            calls.fetch_add(1, Ordering::SeqCst);
            let (b, _, z, h, w) = batch.dim();
            let mut out = Array5::<f32>::zeros((b, 3, z, h, w));
            out.index_axis_mut(Axis(1), 1).fill(1.0);
            Ok(out)
        };
        let out = inferer((160, 160, 160), 0.6)
            .infer(&ramp((100, 100, 50)), &model)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.shape(), (100, 100, 50));
        assert_eq!(out.channels(), 3);
        assert!(out.channel(1).iter().all(|v| f32_eq(*v, 1.0)));
        assert!(out.channel(0).iter().all(|v| *v == 0.0));
    }

    /// 400³ 与 160³ 的情形按 1/10 缩小: 每轴 5 个窗口.
    #[test]
    fn test_reduced_scale_multi_window() {
        let calls = AtomicUsize::new(0);
        let model = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            calls.fetch_add(batch.len_of(Axis(0)), Ordering::SeqCst);
            let mut out = batch.to_owned();
            out.mapv_inplace(|v| v + 1.0);
            Ok(out)
        };
        let cfg = InfererConfig::default()
            .with_roi((16, 16, 16))
            .with_overlap(0.6)
            .with_sw_batch_size(4);
        let vol = ramp((40, 40, 40));
        let out = SlidingWindowInferer::new(cfg)
            .unwrap()
            .infer(&vol, &model)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 125);
        assert_eq!(out.shape(), (40, 40, 40));
        for (a, b) in out.data().iter().zip(vol.data().iter()) {
            assert!(f32_eq(*a, *b + 1.0));
        }
    }

    #[test]
    #[ignore = "需要数 GB 内存和较长时间"]
    fn test_full_scale_liver_tumor_grid() {
        let calls = AtomicUsize::new(0);
        let model = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            calls.fetch_add(batch.len_of(Axis(0)), Ordering::SeqCst);
            let (b, _, z, h, w) = batch.dim();
            Ok(Array5::from_elem((b, 3, z, h, w), 1.0))
        };
        let vol = Volume::new(Array4::zeros((1, 400, 400, 400)), Geometry::default());
        let out = inferer(LIVER_TUMOR_ROI, LIVER_TUMOR_OVERLAP)
            .infer(&vol, &model)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 125);
        assert_eq!(out.shape(), (400, 400, 400));
        assert!(out.data().iter().all(|v| f32_eq(*v, 1.0)));
    }

    #[test]
    fn test_parallel_batches_are_deterministic() {
        let vol = ramp((20, 18, 16));
        let model = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            Ok(batch.mapv(|v| (v * 3.0).sin()))
        };
        let run = |n: usize| {
            let cfg = InfererConfig::default()
                .with_roi((8, 8, 8))
                .with_overlap(0.5)
                .with_max_parallel_batches(n);
            SlidingWindowInferer::new(cfg)
                .unwrap()
                .infer(&vol, &model)
                .unwrap()
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn test_malformed_model_output() {
        let inf = inferer((4, 4, 4), 0.5);
        let vol = ramp((6, 6, 6));

        let wrong_batch = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            let (b, _, z, h, w) = batch.dim();
            Ok(Array5::zeros((b + 1, 2, z, h, w)))
        };
        let wrong_shape = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            let b = batch.len_of(Axis(0));
            Ok(Array5::zeros((b, 2, 3, 4, 4)))
        };
        let failing = |_: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            Err(SegError::Internal("boom".into()))
        };
        let calls = AtomicUsize::new(0);
        let varying = |batch: ArrayView5<f32>| -> SegResult<Array5<f32>> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let (b, _, z, h, w) = batch.dim();
            Ok(Array5::zeros((b, 2 + n % 2, z, h, w)))
        };
        for model in [&wrong_batch as &dyn SegModel, &wrong_shape, &failing, &varying] {
            let err = inf.infer(&vol, model).unwrap_err();
            assert!(matches!(err, SegError::Inference(_)), "{err}");
        }
    }

    #[test]
    fn test_invalid_config_and_input() {
        let bad = [
            InfererConfig::default().with_roi((0, 4, 4)),
            InfererConfig::default().with_overlap(1.0),
            InfererConfig::default().with_overlap(-0.1),
            InfererConfig::default().with_sw_batch_size(0),
        ];
        for cfg in bad {
            assert!(matches!(
                SlidingWindowInferer::new(cfg),
                Err(SegError::InvalidInput(_))
            ));
        }

        let empty = Volume::new(Array4::zeros((1, 0, 4, 4)), Geometry::default());
        let err = inferer((4, 4, 4), 0.5)
            .infer(&empty, &identity)
            .unwrap_err();
        assert!(matches!(err, SegError::InvalidInput(_)));
    }
}
