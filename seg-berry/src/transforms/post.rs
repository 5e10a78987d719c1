//! 模型输出的后处理: 激活与离散化.

use log::debug;
use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

use super::history::TransformHistory;
use super::Transform;
use crate::data::{DataRecord, Volume};
use crate::error::{SegError, SegResult};

/// 对 `key` 上的通道维施加激活函数.
///
/// `softmax` 与 `sigmoid` 恰好开启一个.
#[derive(Debug, Clone)]
pub struct Activations {
    key: String,
    softmax: bool,
    sigmoid: bool,
}

impl Activations {
    /// 构建激活阶段. 两个开关的组合在执行时检查.
    #[inline]
    pub fn new(key: &str, softmax: bool, sigmoid: bool) -> Self {
        Self {
            key: key.to_owned(),
            softmax,
            sigmoid,
        }
    }

    /// 通道维 softmax.
    #[inline]
    pub fn softmax(key: &str) -> Self {
        Self::new(key, true, false)
    }

    /// 逐元素 sigmoid.
    #[inline]
    pub fn sigmoid(key: &str) -> Self {
        Self::new(key, false, true)
    }
}

/// 对单个体素的各通道原地做数值稳定的 softmax.
fn softmax_lane(mut lane: ArrayViewMut1<f32>) {
    let max = lane.fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
    lane.mapv_inplace(|v| (v - max).exp());
    let sum = lane.sum();
    lane.mapv_inplace(|v| v / sum);
}

#[inline]
fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

impl Transform for Activations {
    fn name(&self) -> &'static str {
        "Activations"
    }

    fn apply(&self, mut record: DataRecord, _: &TransformHistory) -> SegResult<DataRecord> {
        if self.softmax == self.sigmoid {
            return Err(SegError::stage(
                self.name(),
                "softmax 与 sigmoid 必须恰好开启一个",
            ));
        }
        let vol = record.take_volume(self.name(), &self.key)?;
        let (mut data, geometry) = vol.into_parts();
        if self.softmax {
            debug!("Activations `{}`: softmax over {} channels", self.key, data.len_of(Axis(0)));
            data.lanes_mut(Axis(0)).into_iter().for_each(softmax_lane);
        } else {
            debug!("Activations `{}`: sigmoid", self.key);
            data.mapv_inplace(sigmoid);
        }
        record.insert_volume(&self.key, Volume::new(data, geometry));
        Ok(record)
    }
}

/// 对 `key` 上的通道维取 argmax, 输出单通道的类别索引.
///
/// 多个通道取值相同时取索引最小者.
#[derive(Debug, Clone)]
pub struct AsDiscrete {
    key: String,
}

impl AsDiscrete {
    /// 构建离散化阶段.
    #[inline]
    pub fn argmax(key: &str) -> Self {
        Self {
            key: key.to_owned(),
        }
    }
}

impl Transform for AsDiscrete {
    fn name(&self) -> &'static str {
        "AsDiscrete"
    }

    fn apply(&self, mut record: DataRecord, _: &TransformHistory) -> SegResult<DataRecord> {
        let vol = record.take_volume(self.name(), &self.key)?;
        if vol.channels() == 0 {
            return Err(SegError::stage(self.name(), "没有任何通道"));
        }

        let view = vol.data();
        let lanes = view.lanes(Axis(0));
        let argmax = |lane: ArrayView1<f32>| -> f32 {
            let mut best = 0;
            for (c, v) in lane.iter().enumerate().skip(1) {
                if *v > lane[best] {
                    best = c;
                }
            }
            best as f32
        };
        let labels: Array3<f32> = {
            cfg_if::cfg_if! {
                if #[cfg(feature = "rayon")] {
                    Zip::from(lanes).par_map_collect(argmax)
                } else {
                    Zip::from(lanes).map_collect(argmax)
                }
            }
        };
        let out = vol.with_data(labels.insert_axis(Axis(0)));
        record.insert_volume(&self.key, out);
        Ok(record)
    }
}
