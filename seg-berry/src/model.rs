//! 分割模型.
//!
//! 模型是只读的共享资源: 加载一次, 以 [`ModelHandle`] 的形式在多次调用,
//! 甚至多个算子实例之间共享.

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array5, ArrayView5};

use crate::error::{SegError, SegResult};

/// 三维分割模型.
///
/// 输入与输出均为 `(b, c, z, h, w)` 布局. 输出的批大小和空间形状必须与输入相同,
/// 通道数为类别数.
pub trait SegModel: Send + Sync {
    /// 对一批窗口做前向推理.
    fn predict(&self, batch: ArrayView5<f32>) -> SegResult<Array5<f32>>;
}

impl<F> SegModel for F
where
    F: Fn(ArrayView5<f32>) -> SegResult<Array5<f32>> + Send + Sync,
{
    #[inline]
    fn predict(&self, batch: ArrayView5<f32>) -> SegResult<Array5<f32>> {
        self(batch)
    }
}

/// 模型的共享句柄.
pub type ModelHandle = Arc<dyn SegModel>;

/// 从 `path` 加载模型.
///
/// 需要开启 `onnx` feature; 否则总是返回 `SegError::Model`.
pub fn load_model<P: AsRef<Path>>(path: P) -> SegResult<ModelHandle> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "onnx")] {
            Ok(Arc::new(onnx::OnnxModel::open(path)?))
        } else {
            Err(SegError::Model(format!(
                "无法加载 {}: 未开启 `onnx` feature",
                path.as_ref().display()
            )))
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;

    use log::info;
    use ndarray::{Array5, ArrayView5, Ix5};
    use ort::{GraphOptimizationLevel, Session};

    use super::SegModel;
    use crate::error::{SegError, SegResult};

    /// 由 ONNX Runtime 执行的模型. 仅使用第一个输入和第一个输出.
    pub struct OnnxModel {
        session: Session,
    }

    impl OnnxModel {
        /// 打开 `.onnx` 模型文件.
        pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
            let path = path.as_ref();
            let model_err = |e: ort::Error| SegError::Model(format!("{}: {e}", path.display()));
            let session = Session::builder()
                .map_err(model_err)?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(model_err)?
                .commit_from_file(path)
                .map_err(model_err)?;
            info!("ONNX model loaded from {}", path.display());
            Ok(Self { session })
        }
    }

    impl SegModel for OnnxModel {
        fn predict(&self, batch: ArrayView5<f32>) -> SegResult<Array5<f32>> {
            let infer_err = |e: ort::Error| SegError::Inference(e.to_string());
            let batch = batch.as_standard_layout();
            let outputs = self
                .session
                .run(ort::inputs![batch.view()].map_err(infer_err)?)
                .map_err(infer_err)?;
            let pred = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(infer_err)?
                .view()
                .to_owned()
                .into_dimensionality::<Ix5>()
                .map_err(|e| SegError::Inference(format!("模型输出不是五维张量: {e}")))?;
            Ok(pred)
        }
    }
}
