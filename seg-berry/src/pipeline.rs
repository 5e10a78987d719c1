//! 有序的变换流水线.

use log::{debug, info};

use crate::data::DataRecord;
use crate::error::SegResult;
use crate::transforms::{Stage, Transform, TransformHistory};

/// 按固定顺序执行的一组阶段, 独占自己的变换历史.
///
/// 阶段顺序在构建时确定, 之后不可修改. 需要被 `Invert` 引用的流水线应当放进
/// `Arc` 中共享: `Invert` 依据流水线实例 (而不是它的内容) 查找历史.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    history: TransformHistory,
}

impl Pipeline {
    /// 由阶段列表构建流水线.
    pub fn new(stages: Vec<Stage>) -> Self {
        info!(
            "Pipeline built: [{}]",
            stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        );
        Self {
            stages,
            history: TransformHistory::new(),
        }
    }

    /// 依次对 `record` 施加各阶段. 任一阶段失败时立即返回该错误.
    pub fn apply(&self, record: DataRecord) -> SegResult<DataRecord> {
        self.history.register(record.id());
        self.stages.iter().try_fold(record, |record, stage| {
            debug!("record #{}: {}", record.id().get(), stage.name());
            stage.apply(record, &self.history)
        })
    }

    /// 该流水线的变换历史.
    #[inline]
    pub fn history(&self) -> &TransformHistory {
        &self.history
    }

    /// 全部阶段.
    #[inline]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// 阶段数.
    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 是否没有阶段.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<T: IntoIterator<Item = Stage>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Image, ImageMeta, VolumeAttr};
    use crate::transforms::{CropForeground, LoadImage, ScaleIntensityRange, Spacing};
    use ndarray::Array3;

    fn image() -> Image {
        let g = Geometry::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let data = Array3::from_shape_fn((4, 6, 6), |(z, h, w)| {
            if (1..3).contains(&z) && (2..4).contains(&h) && (2..5).contains(&w) {
                100.0
            } else {
                -500.0
            }
        });
        Image::new(data, ImageMeta::with_geometry(g))
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let pipe: Pipeline = [
            LoadImage::new("image").into(),
            Spacing::liver_tumor("image").into(),
            ScaleIntensityRange::liver_tumor("image").into(),
            CropForeground::new("image", "image").into(),
        ]
        .into_iter()
        .collect();
        assert_eq!(pipe.len(), 4);
        assert!(pipe.stages()[1].is_geometric());

        let r = pipe.apply(DataRecord::from_image("image", image())).unwrap();
        let vol = r.volume("test", "image").unwrap();
        assert!(vol.shape().0 < 8);
        assert!(vol.data().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(r.contains("image_meta_dict"));

        let entries = pipe.history().entries(r.id()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Spacing", "CropForeground"]);
    }

    #[test]
    fn test_pipeline_missing_key() {
        let pipe = Pipeline::new(vec![Spacing::liver_tumor("image").into()]);
        let err = pipe.apply(DataRecord::new()).unwrap_err();
        assert!(err.is_stage());
        // 失败的记录仍然登记过, 但没有任何几何变换.
        assert_eq!(pipe.history().len(), 1);
    }

    #[test]
    fn test_empty_pipeline_registers_record() {
        let pipe = Pipeline::default();
        assert!(pipe.is_empty());
        let r = pipe.apply(DataRecord::new()).unwrap();
        assert_eq!(pipe.history().entries(r.id()), Some(vec![]));
    }
}
