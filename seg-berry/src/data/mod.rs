use std::collections::BTreeMap;
use std::ops::Index;

use ndarray::{Array3, Array4, ArrayView, ArrayView3, Axis, Ix3, Ix4};

use crate::consts::gray::*;
use crate::Idx3d;

pub mod geometry;
mod nii;
pub mod record;

pub use geometry::Geometry;
pub use record::{DataRecord, Entry, MetaDict, RecordId};

/// 图像的元信息: 几何描述和若干自由格式的字符串属性 (如 `filename_or_obj`).
///
/// 该结构完全透明, 用户可以直接读写其字段.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageMeta {
    /// 几何描述.
    pub geometry: Geometry,

    /// 其它属性.
    pub extra: MetaDict,
}

impl ImageMeta {
    /// 仅由几何描述构建元信息.
    #[inline]
    pub fn with_geometry(geometry: Geometry) -> Self {
        Self {
            geometry,
            extra: BTreeMap::new(),
        }
    }

    /// 来源文件名. 若未记录则返回 `None`.
    #[inline]
    pub fn filename(&self) -> Option<&str> {
        self.extra.get(FILENAME_META).map(String::as_str)
    }
}

/// 元信息中记录来源文件名的键.
pub const FILENAME_META: &str = "filename_or_obj";

/// 三维体数据的共用属性和部分通用操作.
pub trait VolumeAttr {
    /// 获取几何描述.
    fn geometry(&self) -> &Geometry;

    /// 获取空间形状 `(z, h, w)`.
    fn shape(&self) -> Idx3d;

    /// 获取空间体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 是否存在长度为 0 的轴.
    #[inline]
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 获取单个体素分辨率 `[z, h, w]`, 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.geometry().spacing()
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.geometry().voxel()
    }
}

#[inline]
fn shape3<A>(data: &Array3<A>) -> Idx3d {
    data.dim()
}

/// 3D CT 扫描 (HU), 以 `f32` 保存. 这是上游算子交给本 crate 的输入图像.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array3<f32>,
    meta: ImageMeta,
}

impl VolumeAttr for Image {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.meta.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        shape3(&self.data)
    }
}

impl Index<Idx3d> for Image {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Image {
    /// 由 `(z, h, w)` 格式的数据和元信息创建扫描.
    #[inline]
    pub fn new(data: Array3<f32>, meta: ImageMeta) -> Self {
        Self { data, meta }
    }

    /// 获取元信息.
    #[inline]
    pub fn meta(&self) -> &ImageMeta {
        &self.meta
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 拆分为数据和元信息.
    #[inline]
    pub fn into_parts(self) -> (Array3<f32>, ImageMeta) {
        (self.data, self.meta)
    }
}

/// 3D 分割标签, 以 `u8` 保存. 这是本 crate 交给下游算子的输出图像.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelImage {
    data: Array3<u8>,
    meta: ImageMeta,
}

impl VolumeAttr for LabelImage {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.meta.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        shape3(&self.data)
    }
}

impl Index<Idx3d> for LabelImage {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl LabelImage {
    /// 由 `(z, h, w)` 格式的标签数据和元信息创建分割标签.
    #[inline]
    pub fn new(data: Array3<u8>, meta: ImageMeta) -> Self {
        Self { data, meta }
    }

    /// 获取元信息.
    #[inline]
    pub fn meta(&self) -> &ImageMeta {
        &self.meta
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 拆分为数据和元信息.
    #[inline]
    pub fn into_parts(self) -> (Array3<u8>, ImageMeta) {
        (self.data, self.meta)
    }

    /// 获取 3D 标签中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取分割标签的基本统计信息.
    ///
    /// 统计信息格式为: \[背景体素数, 肝脏体素数, 肿瘤体素数\].
    /// 该操作不会统计任何其他体素信息.
    pub fn numeric_statistics(&self) -> [usize; 3] {
        let mut ans = [0; 3];
        for pixel in self.data.iter().filter(|p| **p <= LITS_TUMOR) {
            ans[*pixel as usize] += 1;
        }
        ans
    }

    /// 肝脏 + 肿瘤体素的实际体积, 以立方毫米为单位.
    #[inline]
    pub fn foreground_volume_mm3(&self) -> f64 {
        let n = self.data.iter().filter(|p| is_liver_or_tumor(**p)).count();
        n as f64 * self.voxel()
    }
}

/// 通道优先的稠密体数据 `(c, z, h, w)`, 是流水线各阶段之间传递的数据.
///
/// 每个阶段都产生新的 `Volume`, 不原地修改已有的实例.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array4<f32>,
    geometry: Geometry,
}

impl VolumeAttr for Volume {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        let (_, z, h, w) = self.data.dim();
        (z, h, w)
    }
}

impl Volume {
    /// 由 `(c, z, h, w)` 格式的数据和几何描述创建体数据.
    #[inline]
    pub fn new(data: Array4<f32>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// 由单通道 `(z, h, w)` 数据创建体数据.
    #[inline]
    pub fn from_single(data: Array3<f32>, geometry: Geometry) -> Self {
        Self::new(data.insert_axis(Axis(0)), geometry)
    }

    /// 通道数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix4> {
        self.data.view()
    }

    /// 获取第 `c` 个通道.
    ///
    /// 当 `c` 越界时 panic.
    #[inline]
    pub fn channel(&self, c: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), c)
    }

    /// 拆分为数据和几何描述.
    #[inline]
    pub fn into_parts(self) -> (Array4<f32>, Geometry) {
        (self.data, self.geometry)
    }

    /// 几何描述不变, 替换数据.
    #[inline]
    pub fn with_data(&self, data: Array4<f32>) -> Self {
        Self::new(data, self.geometry)
    }

    /// 将单通道体数据转换为 `u8` 标签. 取值四舍五入并截断到 `[0, 255]`.
    ///
    /// 若通道数不为 1, 则返回 `None`.
    pub fn to_labels(&self) -> Option<Array3<u8>> {
        (self.channels() == 1).then(|| {
            self.channel(0)
                .mapv(|v| num::clamp(v.round(), 0.0, u8::MAX as f32) as u8)
        })
    }
}
