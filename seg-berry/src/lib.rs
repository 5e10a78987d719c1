#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 肝脏 (及肿瘤) CT 分割推理库.
//!
//! 给定一个 3D CT 扫描, 使用预训练模型分割肝脏和肿瘤, 并将预测还原到原始图像的几何网格上.
//! 核心是一个通用的分割推理引擎:
//!
//! 1. 接受任意的预处理流水线;
//! 2. 在比模型输入大得多的体数据上做滑动窗口推理;
//! 3. 将重叠的窗口预测融合为一个稠密输出;
//! 4. 接受任意的后处理流水线, 其中的 `Invert` 阶段还原预处理中的所有几何变换
//!   (重采样, 裁剪), 使输出与输入逐体素对齐.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 所有三维数组都以 `(z, h, w)` 索引: 切片序号, 图像行, 图像列.
//!   nifti 文件按 `(w, h, z)` 存储, 读写时自动转换.
//! 2. 运行时错误都以 [`SegError`] 同步返回, 不存在自动重试, 也不存在部分结果.
//!   在非期望情况 (违反文档中注明的前置条件) 下, 程序会直接 panic.
//!
//! # 模块概览
//!
//! ### 数据结构 ✅
//!
//! 框架图像 [`Image`] / [`LabelImage`], 流水线中流动的通道优先体数据 [`Volume`],
//! 几何描述 [`Geometry`] 和键值记录 [`DataRecord`].
//!
//! 实现位于 `seg-berry/src/data`.
//!
//! ### 变换阶段与流水线 ✅
//!
//! 加载, 重采样, 强度缩放, 前景裁剪, 激活, 离散化, 几何还原, 保存.
//! 改变几何形状的阶段记录变换历史, 供 `Invert` 使用.
//!
//! 实现位于 `seg-berry/src/transforms` 和 `seg-berry/src/pipeline.rs`.
//!
//! ### 滑动窗口推理 ✅
//!
//! 高斯加权 (或均匀) 融合. 开启 `rayon` feature 时多个批次可以并行推理,
//! 融合结果仍是确定的.
//!
//! 实现位于 `seg-berry/src/inferer`.
//!
//! ### 分割算子 ✅
//!
//! 将预处理, 推理, 后处理串联起来, 通过端口收发数据.
//!
//! 实现位于 `seg-berry/src/operator.rs`.
//!
//! ### ONNX 模型 ✅
//!
//! 开启 `onnx` feature 后可以通过 ONNX Runtime 执行模型.
//!
//! 实现位于 `seg-berry/src/model.rs`.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 滑动窗口大小 `(z, h, w)`.
pub type Roi = (usize, usize, usize);

/// 3D CT 数据结构与 nifti 读写.
pub mod data;

pub use data::{
    DataRecord, Entry, Geometry, Image, ImageMeta, LabelImage, MetaDict, RecordId, Volume,
    VolumeAttr,
};

pub mod consts;

mod error;
pub use error::{SegError, SegResult};

pub mod transforms;

mod pipeline;
pub use pipeline::Pipeline;

pub mod inferer;
pub use inferer::{BlendMode, InfererConfig, SlidingWindowInferer};

pub mod model;
pub use model::{load_model, ModelHandle, SegModel};

mod engine;
pub use engine::SegInferenceEngine;

pub mod config;
pub use config::SegConfig;

pub mod ports;

mod operator;
pub use operator::LiverTumorSegOperator;

pub mod prelude;
