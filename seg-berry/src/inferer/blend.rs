//! 重叠窗口的融合权重.

use ndarray::{Array1, Array3};

use crate::Roi;

/// 窗口内各体素在融合时的权重分布.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlendMode {
    /// 高斯权重: 窗口中心权重为 1, 向边缘衰减. 窗口边缘的预测往往较差,
    /// 该方式能明显减少拼接痕迹.
    #[default]
    Gaussian,

    /// 均匀权重, 即简单平均. 窗口边界附近的精度会下降.
    Constant,
}

/// 高斯权重的标准差与窗口大小之比.
pub const SIGMA_SCALE: f64 = 0.125;

fn gaussian_1d(n: usize, sigma_scale: f64) -> Array1<f32> {
    let sigma = (n as f64 * sigma_scale).max(f64::EPSILON);
    let center = (n / 2) as f64;
    Array1::from_shape_fn(n, |i| {
        let d = i as f64 - center;
        (-(d * d) / (2.0 * sigma * sigma)).exp() as f32
    })
}

/// 构建形状为 `roi` 的权重图.
///
/// 高斯权重的峰值为 1; 下溢为 0 的位置被替换为最小的正权重, 保证每个体素都有贡献.
pub fn importance_map(roi: Roi, mode: BlendMode) -> Array3<f32> {
    match mode {
        BlendMode::Constant => Array3::ones(roi),
        BlendMode::Gaussian => {
            let gz = gaussian_1d(roi.0, SIGMA_SCALE);
            let gh = gaussian_1d(roi.1, SIGMA_SCALE);
            let gw = gaussian_1d(roi.2, SIGMA_SCALE);
            let mut map = Array3::from_shape_fn(roi, |(z, h, w)| gz[z] * gh[h] * gw[w]);
            let max = map.fold(0.0f32, |acc, v| acc.max(*v));
            map /= max;
            let min_positive = map
                .iter()
                .copied()
                .filter(|v| *v > 0.0)
                .fold(f32::INFINITY, f32::min);
            if min_positive.is_finite() {
                map.mapv_inplace(|v| if v > 0.0 { v } else { min_positive });
            }
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_peak_and_positivity() {
        let map = importance_map((9, 16, 5), BlendMode::Gaussian);
        assert_eq!(map.dim(), (9, 16, 5));
        assert_eq!(map[(4, 8, 2)], 1.0);
        assert!(map.iter().all(|v| *v > 0.0 && *v <= 1.0));
        assert!(map[(0, 0, 0)] < map[(4, 8, 2)]);
        // 奇数轴关于中心对称.
        assert_eq!(map[(0, 8, 2)], map[(8, 8, 2)]);
    }

    #[test]
    fn test_constant_map() {
        let map = importance_map((3, 3, 3), BlendMode::Constant);
        assert!(map.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_liver_tumor_roi_map() {
        let map = importance_map((160, 160, 160), BlendMode::Gaussian);
        assert_eq!(map[(80, 80, 80)], 1.0);
        assert!(map[(0, 0, 0)] > 0.0);
    }
}
