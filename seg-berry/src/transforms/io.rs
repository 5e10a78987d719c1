//! 加载与保存.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::history::TransformHistory;
use super::Transform;
use crate::data::{DataRecord, Entry, Volume, FILENAME_META};
use crate::error::SegResult;

/// 元信息键: `"{key}_meta_dict"`.
#[inline]
pub fn meta_key_of(key: &str) -> String {
    format!("{key}_meta_dict")
}

/// 将 `key` 上的框架图像转换为单通道体数据, 并将图像元信息写入 `"{key}_meta_dict"`.
#[derive(Debug, Clone)]
pub struct LoadImage {
    key: String,
}

impl LoadImage {
    /// 构建加载阶段.
    #[inline]
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
        }
    }
}

impl Transform for LoadImage {
    fn name(&self) -> &'static str {
        "LoadImage"
    }

    fn apply(&self, mut record: DataRecord, _: &TransformHistory) -> SegResult<DataRecord> {
        let image = record.take_image(self.name(), &self.key)?;
        let (data, meta) = image.into_parts();
        debug!("LoadImage `{}`: {:?}", self.key, data.dim());
        record.insert(&meta_key_of(&self.key), Entry::Meta(meta.extra));
        record.insert_volume(&self.key, Volume::from_single(data, meta.geometry));
        Ok(record)
    }
}

/// 保存时的体素类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutputDtype {
    /// 原样保存为 `f32`.
    #[default]
    F32,

    /// 四舍五入后保存为 `u8` 标签. 仅支持单通道.
    U8,
}

/// 将 `key` 上的体数据保存为 nifti 文件, 记录本身不变.
///
/// 文件路径为 `output_dir/<stem>/<stem>_<postfix><ext>` (`postfix` 为空时为
/// `output_dir/<stem>/<stem><ext>`), 其中 `stem` 取自元信息
/// `meta_key` 中的来源文件名 (去掉 `.nii` 或 `.nii.gz`); 找不到时为 `"image"`.
#[derive(Debug, Clone)]
pub struct SaveImage {
    key: String,
    output_dir: PathBuf,
    postfix: String,
    dtype: OutputDtype,
    ext: String,
    meta_key: String,
}

/// 默认扩展名, 不压缩.
pub const DEFAULT_EXT: &str = ".nii";

impl SaveImage {
    /// 构建保存阶段, 以 `f32` 和 `.nii` 保存, 从 `"{key}_meta_dict"` 读取文件名.
    pub fn new<P: AsRef<Path>>(key: &str, output_dir: P, postfix: &str) -> Self {
        Self {
            key: key.to_owned(),
            output_dir: output_dir.as_ref().to_path_buf(),
            postfix: postfix.to_owned(),
            dtype: OutputDtype::F32,
            ext: DEFAULT_EXT.to_owned(),
            meta_key: meta_key_of(key),
        }
    }

    /// 设置体素类型.
    #[inline]
    pub fn with_dtype(mut self, dtype: OutputDtype) -> Self {
        self.dtype = dtype;
        self
    }

    /// 设置扩展名, 如 `".nii.gz"`.
    #[inline]
    pub fn with_ext(mut self, ext: &str) -> Self {
        self.ext = ext.to_owned();
        self
    }

    /// 设置读取来源文件名的元信息键.
    #[inline]
    pub fn with_meta_key(mut self, meta_key: &str) -> Self {
        self.meta_key = meta_key.to_owned();
        self
    }

    /// 求保存路径.
    pub fn output_path(&self, record: &DataRecord) -> PathBuf {
        let stem = record
            .meta(&self.meta_key)
            .and_then(|m| m.get(FILENAME_META))
            .and_then(|f| file_stem(f))
            .unwrap_or_else(|| String::from("image"));
        let name = if self.postfix.is_empty() {
            format!("{stem}{}", self.ext)
        } else {
            format!("{stem}_{}{}", self.postfix, self.ext)
        };
        self.output_dir.join(&stem).join(name)
    }
}

/// 去掉目录和 `.nii` / `.nii.gz` 扩展名.
fn file_stem(path: &str) -> Option<String> {
    let name = Path::new(path).file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(name);
    (!stem.is_empty()).then(|| stem.to_owned())
}

impl Transform for SaveImage {
    fn name(&self) -> &'static str {
        "SaveImage"
    }

    fn apply(&self, record: DataRecord, _: &TransformHistory) -> SegResult<DataRecord> {
        let vol = record.volume(self.name(), &self.key)?;
        let path = self.output_path(&record);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        match self.dtype {
            OutputDtype::F32 => vol.save(&path)?,
            OutputDtype::U8 => vol.save_labels(&path)?,
        }
        info!("SaveImage `{}` -> {}", self.key, path.display());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Image, ImageMeta, LabelImage, VolumeAttr};
    use ndarray::Array3;

    fn load(path: &str) -> DataRecord {
        let mut meta = ImageMeta::default();
        meta.extra.insert(FILENAME_META.to_owned(), path.to_owned());
        let img = Image::new(Array3::from_elem((2, 3, 4), 1.0), meta);
        let r = DataRecord::from_image("image", img);
        LoadImage::new("image")
            .apply(r, &TransformHistory::new())
            .unwrap()
    }

    #[test]
    fn test_load_image() {
        let r = load("/data/volume-3.nii.gz");
        let vol = r.volume("test", "image").unwrap();
        assert_eq!(vol.channels(), 1);
        assert_eq!(vol.shape(), (2, 3, 4));
        assert_eq!(
            r.meta("image_meta_dict").unwrap().get(FILENAME_META).unwrap(),
            "/data/volume-3.nii.gz"
        );
        // 已经是体数据, 不能再加载.
        let err = LoadImage::new("image")
            .apply(r, &TransformHistory::new())
            .unwrap_err();
        assert!(err.is_stage());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("/a/b/volume-3.nii.gz").unwrap(), "volume-3");
        assert_eq!(file_stem("case.nii").unwrap(), "case");
        assert_eq!(file_stem("raw").unwrap(), "raw");
        assert!(file_stem("/").is_none());
    }

    #[test]
    fn test_save_image_layout() {
        let dir = tempfile::tempdir().unwrap();
        let r = load("/data/volume-3.nii");
        let save = SaveImage::new("image", dir.path(), "seg").with_dtype(OutputDtype::U8);
        let expect = dir.path().join("volume-3").join("volume-3_seg.nii");
        assert_eq!(save.output_path(&r), expect);

        // 目录已存在时再次保存也应成功.
        let r = save.apply(r, &TransformHistory::new()).unwrap();
        let r = save.apply(r, &TransformHistory::new()).unwrap();
        assert!(r.contains("image"));
        let back = LabelImage::open(&expect).unwrap();
        assert_eq!(back.shape(), (2, 3, 4));
        assert_eq!(back.count(1), 24);
    }

    #[test]
    fn test_save_image_fallback_stem() {
        let mut r = DataRecord::new();
        r.insert_volume(
            "pred",
            Volume::new(ndarray::Array4::zeros((1, 1, 1, 1)), Default::default()),
        );
        let save = SaveImage::new("pred", "/tmp/out", "seg").with_ext(".nii.gz");
        assert_eq!(
            save.output_path(&r),
            PathBuf::from("/tmp/out/image/image_seg.nii.gz")
        );
        let save = SaveImage::new("pred", "/tmp/out", "");
        assert_eq!(save.output_path(&r), PathBuf::from("/tmp/out/image/image.nii"));
    }
}
