//! 算子配置.

use std::env;
use std::path::{Path, PathBuf};

use log::warn;
use once_cell::sync::Lazy;

use crate::consts::{INPUT_KEY, OUTPUT_DIR_ENV, PRED_KEY};
use crate::error::{SegError, SegResult};
use crate::inferer::InfererConfig;

/// `<当前工作目录>/output/saved_images_folder`.
static DEFAULT_OUTPUT_FOLDER: Lazy<PathBuf> = Lazy::new(|| {
    let cwd = env::current_dir().unwrap_or_else(|e| {
        warn!("无法获取当前工作目录 ({e}), 使用 `.` 代替");
        PathBuf::from(".")
    });
    cwd.join("output").join("saved_images_folder")
});

/// 获取默认输出目录.
///
/// 1. 若环境变量 `$SEG_BERRY_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `<当前工作目录>/output/saved_images_folder`.
pub fn output_folder_from_env_or_default() -> PathBuf {
    match env::var(OUTPUT_DIR_ENV) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => DEFAULT_OUTPUT_FOLDER.clone(),
    }
}

/// 肝脏/肿瘤分割算子的构建参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegConfig {
    /// 模型文件路径. 仅由 [`crate::LiverTumorSegOperator::from_config`] 使用.
    pub model_path: PathBuf,

    /// 中间结果和分割结果的输出目录.
    pub output_folder: PathBuf,

    /// 滑动窗口推理参数. `LiverTumorSegOperator` 固定使用 160³ 窗口和 0.6 重叠比例.
    pub inferer: InfererConfig,

    /// 记录中输入图像的键.
    pub input_key: String,

    /// 记录中预测的键.
    pub pred_key: String,

    /// 是否保存预处理前的输入和最终分割结果.
    pub save_images: bool,
}

impl Default for SegConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.onnx"),
            output_folder: output_folder_from_env_or_default(),
            inferer: InfererConfig::default(),
            input_key: INPUT_KEY.to_owned(),
            pred_key: PRED_KEY.to_owned(),
            save_images: false,
        }
    }
}

impl SegConfig {
    /// 设置模型文件路径.
    #[inline]
    pub fn with_model_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.model_path = path.as_ref().to_path_buf();
        self
    }

    /// 设置输出目录.
    #[inline]
    pub fn with_output_folder<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_folder = path.as_ref().to_path_buf();
        self
    }

    /// 设置滑动窗口推理参数.
    #[inline]
    pub fn with_inferer(mut self, inferer: InfererConfig) -> Self {
        self.inferer = inferer;
        self
    }

    /// 设置输入键和预测键.
    #[inline]
    pub fn with_keys(mut self, input_key: &str, pred_key: &str) -> Self {
        self.input_key = input_key.to_owned();
        self.pred_key = pred_key.to_owned();
        self
    }

    /// 设置是否保存图像.
    #[inline]
    pub fn with_save_images(mut self, save_images: bool) -> Self {
        self.save_images = save_images;
        self
    }

    /// 检查参数是否合法.
    pub fn validate(&self) -> SegResult<()> {
        self.inferer.validate()?;
        if self.input_key.is_empty() || self.pred_key.is_empty() {
            return Err(SegError::InvalidInput("记录键不能为空".into()));
        }
        if self.input_key == self.pred_key {
            return Err(SegError::InvalidInput(format!(
                "输入键与预测键相同: `{}`",
                self.input_key
            )));
        }
        if self.output_folder.as_os_str().is_empty() {
            return Err(SegError::InvalidInput("输出目录不能为空".into()));
        }
        Ok(())
    }
}
