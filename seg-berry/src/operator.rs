//! 肝脏/肿瘤分割算子.
//!
//! 算子从 `image` 端口接收 CT 图像, 以 1mm 各向同性重采样, `[-21, 189]` HU
//! 强度窗和前景裁剪做预处理, 以 160³ 窗口, 0.6 重叠做滑动窗口推理, 再经
//! softmax, argmax 和几何还原得到与输入逐体素对齐的标签 (0 背景, 1 肝脏, 2 肿瘤),
//! 从 `seg_image` 端口发出. 输出目录从可选的 `saved_images_folder` 端口发出.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::config::SegConfig;
use crate::consts::{INPUT_PORT_IMAGE, LIVER_TUMOR_OVERLAP, LIVER_TUMOR_ROI};
use crate::data::{Image, LabelImage, VolumeAttr};
use crate::engine::SegInferenceEngine;
use crate::error::{SegError, SegResult};
use crate::inferer::SlidingWindowInferer;
use crate::Roi;
use crate::model::{load_model, ModelHandle};
use crate::pipeline::Pipeline;
use crate::ports::{InputPort, OptionalOutputPort, OutputPort};
use crate::transforms::{
    meta_key_of, Activations, AsDiscrete, CropForeground, Invert, LoadImage, OutputDtype,
    SaveImage, ScaleIntensityRange, Spacing, Stage,
};

/// 肝脏/肿瘤分割算子. 模型以共享句柄持有, 多个算子实例可以共用同一个模型.
pub struct LiverTumorSegOperator {
    config: SegConfig,
    model: ModelHandle,
    inferer: SlidingWindowInferer,
}

impl LiverTumorSegOperator {
    /// 以已加载的模型构建算子. 配置不合法时返回 `SegError::InvalidInput`.
    ///
    /// 窗口大小固定为 160³, 重叠比例固定为 0.6, `config.inferer` 中的这两项会被覆盖;
    /// 批大小, 融合方式和并行批次数按配置使用.
    pub fn new(model: ModelHandle, config: SegConfig) -> SegResult<Self> {
        Self::with_window(model, config, LIVER_TUMOR_ROI, LIVER_TUMOR_OVERLAP)
    }

    pub(crate) fn with_window(
        model: ModelHandle,
        mut config: SegConfig,
        roi: Roi,
        overlap: f64,
    ) -> SegResult<Self> {
        if config.inferer.roi != roi || config.inferer.overlap != overlap {
            warn!(
                "LiverTumorSegOperator uses roi {roi:?}, overlap {overlap}; ignoring configured roi {:?}, overlap {}",
                config.inferer.roi, config.inferer.overlap
            );
            config.inferer.roi = roi;
            config.inferer.overlap = overlap;
        }
        config.validate()?;
        let inferer = SlidingWindowInferer::new(config.inferer.clone())?;
        info!(
            "LiverTumorSegOperator: roi {:?}, overlap {}, output {}",
            config.inferer.roi,
            config.inferer.overlap,
            config.output_folder.display()
        );
        Ok(Self {
            config,
            model,
            inferer,
        })
    }

    /// 从 `config.model_path` 加载模型并构建算子.
    pub fn from_config(config: SegConfig) -> SegResult<Self> {
        let model = load_model(&config.model_path)?;
        Self::new(model, config)
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &SegConfig {
        &self.config
    }

    /// 模型句柄.
    #[inline]
    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// 构建预处理流水线.
    ///
    /// 加载, (保存输入), 1mm 重采样, 强度缩放, 前景裁剪.
    pub fn pre_process(&self, out_dir: &Path) -> Pipeline {
        let key = self.config.input_key.as_str();
        let mut stages: Vec<Stage> = vec![LoadImage::new(key).into()];
        if self.config.save_images {
            stages.push(SaveImage::new(key, out_dir, "").into());
        }
        stages.extend([
            Spacing::liver_tumor(key).into(),
            ScaleIntensityRange::liver_tumor(key).into(),
            CropForeground::new(key, key).into(),
        ]);
        Pipeline::new(stages)
    }

    /// 构建后处理流水线. `pre` 必须是本次推理所用的预处理流水线实例.
    ///
    /// softmax, argmax, 最近邻几何还原, (保存分割结果).
    pub fn post_process(&self, pre: Arc<Pipeline>, out_dir: &Path) -> Pipeline {
        let key = self.config.pred_key.as_str();
        let input_key = self.config.input_key.as_str();
        let mut stages: Vec<Stage> = vec![
            Activations::softmax(key).into(),
            AsDiscrete::argmax(key).into(),
            Invert::new(key, pre, input_key, true).into(),
        ];
        if self.config.save_images {
            stages.push(
                SaveImage::new(key, out_dir, "seg")
                    .with_dtype(OutputDtype::U8)
                    .with_meta_key(&meta_key_of(input_key))
                    .into(),
            );
        }
        Pipeline::new(stages)
    }

    /// 分割 `input`, 返回标签图像和输出目录.
    ///
    /// `input` 为 `None` 时在执行任何阶段之前返回 `SegError::MissingInput`.
    pub fn compute(&self, input: Option<Image>) -> SegResult<(LabelImage, PathBuf)> {
        let Some(image) = input else {
            return Err(SegError::MissingInput(INPUT_PORT_IMAGE.to_owned()));
        };
        let out_dir = self.config.output_folder.clone();
        fs::create_dir_all(&out_dir)?;

        let pre = Arc::new(self.pre_process(&out_dir));
        let post = self.post_process(pre.clone(), &out_dir);
        let engine = SegInferenceEngine::new(pre, post, self.model.clone(), self.inferer.clone())
            .with_keys(&self.config.input_key, &self.config.pred_key);

        let meta = image.meta().clone();
        let mut record = engine.compute_record(image)?;
        let pred = record.take_volume("LiverTumorSegOperator", &self.config.pred_key)?;
        let labels = pred.to_labels().ok_or_else(|| {
            SegError::Internal(format!("后处理输出了 {} 个通道", pred.channels()))
        })?;
        let seg = LabelImage::new(labels, meta);
        let [_, liver, tumor] = seg.numeric_statistics();
        info!(
            "Segmentation {:?}: {liver} liver voxel(s), {tumor} tumor voxel(s), {:.1} mm³ foreground",
            seg.shape(),
            seg.foreground_volume_mm3()
        );
        Ok((seg, out_dir))
    }

    /// 从端口读取输入, 并将结果发往输出端口.
    pub fn compute_ports(
        &self,
        input: &InputPort<Image>,
        seg_image: &OutputPort<LabelImage>,
        saved_images_folder: &OptionalOutputPort<PathBuf>,
    ) -> SegResult<()> {
        let (seg, folder) = self.compute(input.receive())?;
        seg_image.emit(seg)?;
        saved_images_folder.emit(folder);
        Ok(())
    }
}
