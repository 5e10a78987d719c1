//! nifti 文件的读写.
//!
//! nifti 按 `[W, H, z]` 存储体素, 读入时转换为 `(z, H, W)`, 写出时再转换回去.
//! 几何信息优先取自 sform, 其次取自 qform, 都不存在时使用单位方向.

use std::path::Path;

use log::warn;
use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::geometry::AXIAL_DIRECTION;
use super::{Geometry, Image, ImageMeta, LabelImage, Volume, FILENAME_META};
use crate::error::{SegError, SegResult};

/// nifti 的 `[W, H, z]` 分辨率 -> `[z, H, W]`.
#[inline]
fn spacing_from_header(h: &NiftiHeader) -> [f64; 3] {
    let [_, w, h, z, ..] = h.pixdim;
    [z as f64, h as f64, w as f64]
}

/// 由四元数 `(b, c, d)` 求旋转矩阵.
fn quatern_to_mat(b: f64, c: f64, d: f64) -> [[f64; 3]; 3] {
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - c * c - b * b,
        ],
    ]
}

/// 从 header 中解析几何描述.
fn geometry_from_header(h: &NiftiHeader) -> Geometry {
    let spacing = spacing_from_header(h);
    let Some(fallback) = Geometry::from_spacing(spacing) else {
        warn!("nifti header 中的体素分辨率 {spacing:?} 不合法, 使用 1.0mm 代替");
        return Geometry::default();
    };

    // nifti 的 (i, j, k) 列 -> 本 crate 的 (z, h, w) 轴.
    let (direction, origin) = if h.sform_code > 0 {
        let rows = [h.srow_x, h.srow_y, h.srow_z];
        let mut dir = [[0.0; 3]; 3];
        for (r, row) in rows.iter().enumerate() {
            for (axis, col) in [2usize, 1, 0].into_iter().enumerate() {
                dir[r][axis] = row[col] as f64 / spacing[axis];
            }
        }
        (dir, rows.map(|row| row[3] as f64))
    } else if h.qform_code > 0 {
        let rot = quatern_to_mat(h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let mut dir = [[0.0; 3]; 3];
        for (r, row) in rot.iter().enumerate() {
            dir[r] = [row[2] * qfac, row[1], row[0]];
        }
        let origin = [h.quatern_x, h.quatern_y, h.quatern_z].map(|v| v as f64);
        (dir, origin)
    } else {
        (AXIAL_DIRECTION, [0.0; 3])
    };

    Geometry::new(spacing, origin, direction).unwrap_or(fallback)
}

/// 由几何描述构造一个仅含 pixdim 和 sform 的 header.
fn header_from_geometry(g: &Geometry) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    let [sz, sh, sw] = g.spacing();
    let [_, pw, ph, pz, ..] = &mut header.pixdim;
    (*pw, *ph, *pz) = (sw as f32, sh as f32, sz as f32);

    let dir = g.direction();
    let origin = g.origin();
    let mut rows = [[0.0f32; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        // (z, h, w) 轴 -> nifti 的 (k, j, i) 列.
        row[0] = (dir[r][2] * sw) as f32;
        row[1] = (dir[r][1] * sh) as f32;
        row[2] = (dir[r][0] * sz) as f32;
        row[3] = origin[r] as f32;
    }
    [header.srow_x, header.srow_y, header.srow_z] = rows;
    header.sform_code = 1;
    header.qform_code = 0;
    // 空间单位为毫米.
    header.xyzt_units = 2;
    header
}

/// 将 nifti 读出的 `[W, H, z]` (或 `[W, H, z, 1]`) 数组转换为 `(z, H, W)`.
fn to_zhw<A: Clone>(data: ArrayD<A>) -> SegResult<Array3<A>> {
    let data = if data.ndim() == 4 && data.len_of(Axis(3)) == 1 {
        data.index_axis_move(Axis(3), 0)
    } else {
        data
    };
    if data.ndim() != 3 {
        return Err(SegError::InvalidInput(format!(
            "仅支持三维 nifti 数据, 但发现了 {} 维",
            data.ndim()
        )));
    }
    // [W, H, z] -> [z, H, W].
    let data = data
        .permuted_axes(vec![2, 1, 0])
        .into_dimensionality::<Ix3>()
        .map_err(|e| SegError::InvalidInput(e.to_string()))?;
    Ok(if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().to_owned()
    })
}

fn meta_from_header(header: &NiftiHeader, path: &Path) -> ImageMeta {
    let mut meta = ImageMeta::with_geometry(geometry_from_header(header));
    meta.extra
        .insert(FILENAME_META.to_owned(), path.display().to_string());
    meta
}

impl Image {
    /// 打开 nii (或 nii.gz) 文件格式的 3D CT 扫描. `path` 为文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let meta = meta_from_header(obj.header(), path.as_ref());
        let data = to_zhw(obj.into_volume().into_ndarray::<f32>()?)?;
        Ok(Self::new(data, meta))
    }

    /// 以 `f32` 格式保存到 `path`. 扩展名为 `.gz` 时压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let header = header_from_geometry(&self.meta.geometry);
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&data)?;
        Ok(())
    }
}

impl LabelImage {
    /// 打开 nii (或 nii.gz) 文件格式的 3D 分割标签.
    pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let meta = meta_from_header(obj.header(), path.as_ref());
        let data = to_zhw(obj.into_volume().into_ndarray::<u8>()?)?;
        Ok(Self::new(data, meta))
    }

    /// 以 `u8` 格式保存到 `path`. 扩展名为 `.gz` 时压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let header = header_from_geometry(&self.meta.geometry);
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&data)?;
        Ok(())
    }
}

impl Volume {
    /// 以 `f32` 格式保存到 `path`. 单通道时保存为三维, 否则保存为 `[W, H, z, c]`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let header = header_from_geometry(&self.geometry);
        let writer = WriterOptions::new(path.as_ref()).reference_header(&header);
        if self.channels() == 1 {
            writer.write_nifti(&self.channel(0).permuted_axes([2, 1, 0]))?;
        } else {
            writer.write_nifti(&self.data.view().permuted_axes([3, 2, 1, 0]))?;
        }
        Ok(())
    }

    /// 将单通道体数据四舍五入后以 `u8` 格式保存到 `path`.
    pub fn save_labels<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let labels = self.to_labels().ok_or_else(|| {
            SegError::InvalidInput(format!("只能将单通道数据保存为标签, 但有 {} 个通道", self.channels()))
        })?;
        LabelImage::new(labels, ImageMeta::with_geometry(self.geometry)).save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VolumeAttr;
    use ndarray::Array;

    #[test]
    fn test_header_geometry_round_trip() {
        let g = Geometry::new([2.5, 0.75, 0.5], [-10.0, 3.0, 7.5], AXIAL_DIRECTION).unwrap();
        let h = header_from_geometry(&g);
        assert_eq!(h.pixdim[1], 0.5);
        assert_eq!(h.pixdim[3], 2.5);
        assert_eq!(geometry_from_header(&h), g);
    }

    #[test]
    fn test_header_without_transform() {
        let mut h = NiftiHeader::default();
        h.pixdim[1..4].copy_from_slice(&[0.75, 0.75, 5.0]);
        h.sform_code = 0;
        h.qform_code = 0;
        let g = geometry_from_header(&h);
        assert_eq!(g.direction(), AXIAL_DIRECTION);
        assert_eq!(g.spacing(), [5.0, 0.75, 0.75]);
    }

    #[test]
    fn test_header_qform_origin() {
        let mut h = NiftiHeader::default();
        h.pixdim[..4].copy_from_slice(&[1.0, 0.5, 0.5, 2.0]);
        h.sform_code = 0;
        h.qform_code = 1;
        (h.quatern_b, h.quatern_c, h.quatern_d) = (0.0, 0.0, 0.0);
        (h.quatern_x, h.quatern_y, h.quatern_z) = (12.5, -3.0, 40.0);
        let g = geometry_from_header(&h);
        assert_eq!(g.origin(), [12.5, -3.0, 40.0]);
        assert_eq!(g.direction(), AXIAL_DIRECTION);
        assert_eq!(g.spacing(), [2.0, 0.5, 0.5]);
    }

    #[test]
    fn test_save_and_open_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label.nii");
        let g = Geometry::from_spacing([2.0, 1.0, 1.0]).unwrap();
        let data = Array::from_shape_fn((3, 4, 5), |(z, h, w)| ((z + h + w) % 3) as u8);
        let label = LabelImage::new(data.clone(), ImageMeta::with_geometry(g));
        label.save(&path).unwrap();

        let back = LabelImage::open(&path).unwrap();
        assert_eq!(back.shape(), (3, 4, 5));
        assert_eq!(back.data(), data.view());
        assert_eq!(back.pix_dim(), [2.0, 1.0, 1.0]);
        assert!(back.meta().filename().is_some_and(|f| f.ends_with("label.nii")));
    }
}
