//! 三维重采样.
//!
//! 采用 `align_corners` 映射: 输出的首尾体素中心与输入的首尾体素中心对齐,
//! 因此输出第 `i` 个体素对应输入坐标 `i * (n_in - 1) / (n_out - 1)`.

use ndarray::{Array3, Array4, ArrayView3, Axis, Zip};

use crate::Idx3d;

/// 插值方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterpMode {
    /// 最近邻. 标签数据必须使用该方式, 以免产生不存在的中间类别.
    Nearest,

    /// 三线性.
    Linear,
}

/// 单轴上的采样表: 每个输出索引对应 `(下界, 上界, 上界权重)`.
fn axis_table(n_in: usize, n_out: usize, mode: InterpMode) -> Vec<(usize, usize, f32)> {
    debug_assert!(n_in >= 1 && n_out >= 1);
    let last = n_in - 1;
    let scale = if n_out > 1 {
        last as f64 / (n_out - 1) as f64
    } else {
        0.0
    };
    (0..n_out)
        .map(|i| {
            let src = if n_out > 1 {
                i as f64 * scale
            } else {
                last as f64 / 2.0
            };
            match mode {
                InterpMode::Nearest => {
                    let idx = num::clamp(src.round() as usize, 0, last);
                    (idx, idx, 0.0)
                }
                InterpMode::Linear => {
                    let lo = num::clamp(src.floor() as usize, 0, last);
                    let hi = (lo + 1).min(last);
                    (lo, hi, (src - lo as f64) as f32)
                }
            }
        })
        .collect()
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// 将单通道数据重采样为 `out_shape`.
///
/// `data` 或 `out_shape` 的任一轴为 0 时程序 panic.
pub fn resample_3d(data: ArrayView3<f32>, out_shape: Idx3d, mode: InterpMode) -> Array3<f32> {
    let (iz, ih, iw) = data.dim();
    let (oz, oh, ow) = out_shape;
    assert!(iz * ih * iw != 0 && oz * oh * ow != 0, "不能对空数据重采样");

    if data.dim() == out_shape {
        return data.to_owned();
    }

    let tz = axis_table(iz, oz, mode);
    let th = axis_table(ih, oh, mode);
    let tw = axis_table(iw, ow, mode);

    let mut out = Array3::<f32>::zeros(out_shape);
    let op = |(z, h, w): Idx3d, v: &mut f32| {
        let (z0, z1, fz) = tz[z];
        let (h0, h1, fh) = th[h];
        let (w0, w1, fw) = tw[w];
        *v = match mode {
            InterpMode::Nearest => data[(z0, h0, w0)],
            InterpMode::Linear => {
                let c00 = lerp(data[(z0, h0, w0)], data[(z0, h0, w1)], fw);
                let c01 = lerp(data[(z0, h1, w0)], data[(z0, h1, w1)], fw);
                let c10 = lerp(data[(z1, h0, w0)], data[(z1, h0, w1)], fw);
                let c11 = lerp(data[(z1, h1, w0)], data[(z1, h1, w1)], fw);
                lerp(lerp(c00, c01, fh), lerp(c10, c11, fh), fz)
            }
        };
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::indexed(&mut out).par_for_each(op);
        } else {
            Zip::indexed(&mut out).for_each(op);
        }
    }
    out
}

/// 对每个通道分别重采样.
pub fn resample_channels(data: &Array4<f32>, out_shape: Idx3d, mode: InterpMode) -> Array4<f32> {
    let (oz, oh, ow) = out_shape;
    let mut out = Array4::<f32>::zeros((data.len_of(Axis(0)), oz, oh, ow));
    for (src, mut dst) in data.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        dst.assign(&resample_3d(src, out_shape, mode));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_resample_identity_shape() {
        let a = Array::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 12 + h * 4 + w) as f32);
        assert_eq!(resample_3d(a.view(), (2, 3, 4), InterpMode::Linear), a);
    }

    #[test]
    fn test_resample_linear_upsample() {
        // 沿 w 方向 0, 1, 2 -> 5 个点.
        let a = Array::from_shape_fn((1, 1, 3), |(_, _, w)| w as f32);
        let b = resample_3d(a.view(), (1, 1, 5), InterpMode::Linear);
        let expect = [0.0, 0.5, 1.0, 1.5, 2.0];
        for (v, e) in b.iter().zip(expect) {
            assert!(f32_eq(*v, e));
        }
    }

    #[test]
    fn test_resample_nearest_keeps_label_set() {
        let a = Array::from_shape_fn((4, 5, 6), |(z, h, w)| ((z + h + w) % 3) as f32);
        for shape in [(7, 3, 11), (2, 9, 4), (1, 1, 1)] {
            let b = resample_3d(a.view(), shape, InterpMode::Nearest);
            assert_eq!(b.dim(), shape);
            assert!(b.iter().all(|v| [0.0, 1.0, 2.0].contains(v)));
        }
    }

    #[test]
    fn test_resample_corners_aligned() {
        let a = Array::from_shape_fn((3, 3, 3), |(z, h, w)| (z * 9 + h * 3 + w) as f32);
        let b = resample_3d(a.view(), (5, 7, 4), InterpMode::Linear);
        assert!(f32_eq(b[(0, 0, 0)], a[(0, 0, 0)]));
        assert!(f32_eq(b[(4, 6, 3)], a[(2, 2, 2)]));
    }
}
