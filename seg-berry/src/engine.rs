//! 通用的分割推理引擎: 预处理, 滑动窗口推理, 后处理.

use std::sync::Arc;

use log::info;

use crate::consts::{INPUT_KEY, PRED_KEY};
use crate::data::{DataRecord, Image, VolumeAttr};
use crate::error::{SegError, SegResult};
use crate::inferer::SlidingWindowInferer;
use crate::model::ModelHandle;
use crate::pipeline::Pipeline;

/// 将预处理流水线, 模型, 滑动窗口推理器和后处理流水线串联起来.
///
/// 后处理流水线中的 `Invert` 阶段应当引用同一个 `pre` 实例.
///
/// `pre` 的变换历史为每条经过的记录保留一份条目, 且从不清理, 因此引擎应按次构建:
/// 每次推理使用新的流水线和新的引擎 ([`crate::LiverTumorSegOperator`] 即如此).
/// 重复使用同一个引擎时, 历史随调用次数增长.
pub struct SegInferenceEngine {
    pre: Arc<Pipeline>,
    post: Pipeline,
    model: ModelHandle,
    inferer: SlidingWindowInferer,
    input_key: String,
    pred_key: String,
}

impl SegInferenceEngine {
    /// 构建引擎. 输入键为 `"image"`, 预测键为 `"pred"`.
    pub fn new(
        pre: Arc<Pipeline>,
        post: Pipeline,
        model: ModelHandle,
        inferer: SlidingWindowInferer,
    ) -> Self {
        Self {
            pre,
            post,
            model,
            inferer,
            input_key: INPUT_KEY.to_owned(),
            pred_key: PRED_KEY.to_owned(),
        }
    }

    /// 设置输入键和预测键.
    pub fn with_keys(mut self, input_key: &str, pred_key: &str) -> Self {
        self.input_key = input_key.to_owned();
        self.pred_key = pred_key.to_owned();
        self
    }

    /// 预处理流水线.
    #[inline]
    pub fn pre(&self) -> &Arc<Pipeline> {
        &self.pre
    }

    /// 后处理流水线.
    #[inline]
    pub fn post(&self) -> &Pipeline {
        &self.post
    }

    /// 滑动窗口推理器.
    #[inline]
    pub fn inferer(&self) -> &SlidingWindowInferer {
        &self.inferer
    }

    /// 完整执行一次推理, 返回后处理之后的记录.
    ///
    /// 预测 (后处理之后) 位于预测键上, 预处理后的输入仍位于输入键上.
    pub fn compute_record(&self, image: Image) -> SegResult<DataRecord> {
        if image.is_empty() {
            return Err(SegError::InvalidInput(format!(
                "输入图像形状为 {:?}",
                image.shape()
            )));
        }
        info!("Inference on image {:?} @ {:?}mm", image.shape(), image.pix_dim());

        let record = DataRecord::from_image(&self.input_key, image);
        let mut record = self.pre.apply(record)?;
        let pred = {
            let vol = record.volume("SlidingWindowInferer", &self.input_key)?;
            self.inferer.infer(vol, self.model.as_ref())?
        };
        record.insert_volume(&self.pred_key, pred);
        self.post.apply(record)
    }
}
