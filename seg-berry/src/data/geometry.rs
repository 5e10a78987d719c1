//! 体数据的空间几何信息.
//!
//! 数组一律以 `(z, h, w)` 顺序索引. 物理坐标以 `[x, y, z]` 顺序表示, 单位为毫米.
//! 方向矩阵的第 `j` 列是数组第 `j` 轴在物理空间中的单位方向.

use crate::Idx3d;

/// 数组轴 `(z, h, w)` 分别对应物理 `z`, `y`, `x` 方向时的方向矩阵.
pub const AXIAL_DIRECTION: [[f64; 3]; 3] = [
    // 物理 x 分量
    [0.0, 0.0, 1.0],
    // 物理 y 分量
    [0.0, 1.0, 0.0],
    // 物理 z 分量
    [1.0, 0.0, 0.0],
];

/// 体数据的几何描述: 体素分辨率, 原点和方向.
///
/// 该结构是只读的. 若要修改几何参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Geometry {
    /// `[z, h, w]`, 单位为毫米.
    spacing: [f64; 3],
    /// 体素 `(0, 0, 0)` 的物理坐标 `[x, y, z]`.
    origin: [f64; 3],
    /// 列向量为各数组轴的物理方向.
    direction: [[f64; 3]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: AXIAL_DIRECTION,
        }
    }
}

#[inline]
fn is_valid_spacing(spacing: &[f64; 3]) -> bool {
    spacing.iter().all(|s| s.is_finite() && *s > 0.0)
}

impl Geometry {
    /// 构建几何描述.
    ///
    /// `spacing` 的每个分量必须是正有限值, 否则返回 `None`.
    pub fn new(spacing: [f64; 3], origin: [f64; 3], direction: [[f64; 3]; 3]) -> Option<Self> {
        is_valid_spacing(&spacing).then_some(Self {
            spacing,
            origin,
            direction,
        })
    }

    /// 以原点为 0, 轴向方向构建几何描述.
    #[inline]
    pub fn from_spacing(spacing: [f64; 3]) -> Option<Self> {
        Self::new(spacing, [0.0; 3], AXIAL_DIRECTION)
    }

    /// 体素分辨率 `[z, h, w]`, 单位为毫米.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 原点.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 方向矩阵.
    #[inline]
    pub fn direction(&self) -> [[f64; 3]; 3] {
        self.direction
    }

    /// 将 (可能为小数的) 体素索引 `(z, h, w)` 转换为物理坐标 `[x, y, z]`.
    pub fn voxel_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let mut ans = self.origin;
        for (row, a) in ans.iter_mut().enumerate() {
            for axis in 0..3 {
                *a += self.direction[row][axis] * self.spacing[axis] * index[axis];
            }
        }
        ans
    }

    /// 以 `start` 为新的体素 `(0, 0, 0)` 裁剪后的几何描述.
    #[inline]
    pub fn cropped(&self, (z, h, w): Idx3d) -> Self {
        Self {
            origin: self.voxel_to_physical([z as f64, h as f64, w as f64]),
            ..*self
        }
    }

    /// 原点和方向不变, 仅替换体素分辨率.
    ///
    /// `spacing` 不合法时返回 `None`.
    #[inline]
    pub fn with_spacing(&self, spacing: [f64; 3]) -> Option<Self> {
        Self::new(spacing, self.origin, self.direction)
    }

    /// 体素的实际体积, 以立方毫米为单位.
    #[inline]
    pub fn voxel(&self) -> f64 {
        self.spacing.iter().product()
    }
}
