//! 运行时错误.

use thiserror::Error;

/// 分割流程的运行时错误.
///
/// 所有错误都同步地传播给调用者, 不存在自动重试, 也不存在 "部分结果" 模式.
#[derive(Error, Debug)]
pub enum SegError {
    /// 指定端口上没有收到输入图像.
    #[error("端口 `{0}` 上没有输入图像")]
    MissingInput(String),

    /// 流水线某一阶段的前置条件不满足.
    #[error("阶段 `{stage}` 执行失败: {reason}")]
    Stage {
        /// 阶段名.
        stage: &'static str,
        /// 失败原因.
        reason: String,
    },

    /// 退化的输入 (如空体数据) 或非法配置.
    #[error("非法输入: {0}")]
    InvalidInput(String),

    /// 模型推理失败, 或模型输出形状不合法.
    #[error("模型推理失败: {0}")]
    Inference(String),

    /// 滑动窗口内部不变量被破坏. 出现该错误说明实现存在缺陷.
    #[error("内部错误: {0}")]
    Internal(String),

    /// 模型文件无法加载.
    #[error("模型加载失败: {0}")]
    Model(String),

    /// 必选输出端口没有接收者.
    #[error("输出端口 `{0}` 没有接收者")]
    PortDisconnected(String),

    /// 底层 I/O 错误.
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// nifti 文件读写错误.
    #[error("nifti 错误: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

impl SegError {
    /// 构造 `SegError::Stage`.
    #[inline]
    pub fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            reason: reason.into(),
        }
    }

    /// 是否为阶段错误.
    #[inline]
    pub fn is_stage(&self) -> bool {
        matches!(self, Self::Stage { .. })
    }
}

/// 分割流程运行时结果.
pub type SegResult<T> = Result<T, SegError>;
