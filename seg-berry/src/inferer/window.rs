//! 滑动窗口的位置计算.

use itertools::iproduct;

use crate::{Idx3d, Roi};

/// 单轴上相邻窗口起点的间隔.
///
/// 窗口恰好等于数据大小时间隔为窗口大小, 否则为 `max(floor(roi * (1 - overlap)), 1)`.
#[inline]
pub fn scan_interval(size: usize, roi: usize, overlap: f64) -> usize {
    if roi == size {
        roi
    } else {
        ((roi as f64 * (1.0 - overlap)).floor() as usize).max(1)
    }
}

/// 单轴上全部窗口的起点. 要求 `size >= roi`.
///
/// 窗口个数为满足 `(n - 1) * interval + roi >= size` 的最小 `n`;
/// 越过末端的窗口被拉回, 使其恰好结束于 `size`.
pub fn axis_starts(size: usize, roi: usize, interval: usize) -> Vec<usize> {
    debug_assert!(size >= roi && interval > 0);
    let mut n = 1;
    while (n - 1) * interval + roi < size {
        n += 1;
    }
    (0..n)
        .map(|i| {
            let start = i * interval;
            start - (start + roi).saturating_sub(size)
        })
        .collect()
}

/// 在形状为 `shape` 的数据上以 `roi` 大小, `overlap` 比例滑动的全部窗口起点.
///
/// 顺序为 z 最慢, w 最快. 要求每个轴都有 `shape >= roi`.
pub fn window_starts(shape: Idx3d, roi: Roi, overlap: f64) -> Vec<Idx3d> {
    let zs = axis_starts(shape.0, roi.0, scan_interval(shape.0, roi.0, overlap));
    let hs = axis_starts(shape.1, roi.1, scan_interval(shape.1, roi.1, overlap));
    let ws = axis_starts(shape.2, roi.2, scan_interval(shape.2, roi.2, overlap));
    iproduct!(zs, hs, ws).collect()
}

/// 将小于窗口的轴对称填充到窗口大小后的形状, 以及每个轴前端的填充量.
pub fn padded_shape(shape: Idx3d, roi: Roi) -> (Idx3d, Idx3d) {
    let f = |s: usize, r: usize| -> (usize, usize) {
        let p = s.max(r);
        (p, (p - s) / 2)
    };
    let (z, bz) = f(shape.0, roi.0);
    let (h, bh) = f(shape.1, roi.1);
    let (w, bw) = f(shape.2, roi.2);
    ((z, h, w), (bz, bh, bw))
}
