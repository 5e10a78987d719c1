//! 通用常量.

use crate::Roi;

/// 分割标签值.
pub mod gray {
    /// 分割结果中, 背景的体素值.
    pub const LITS_BACKGROUND: u8 = 0;

    /// 分割结果中, 肝脏的体素值.
    pub const LITS_LIVER: u8 = 1;

    /// 分割结果中, 肿瘤的体素值.
    pub const LITS_TUMOR: u8 = 2;

    /// 体素是否是肝脏或肿瘤?
    #[inline]
    pub const fn is_liver_or_tumor(p: u8) -> bool {
        matches!(p, LITS_LIVER | LITS_TUMOR)
    }
}

/// 数据记录中, 输入图像所在的键.
pub const INPUT_KEY: &str = "image";

/// 数据记录中, 预测结果所在的键.
pub const PRED_KEY: &str = "pred";

/// 输入端口名.
pub const INPUT_PORT_IMAGE: &str = "image";

/// 分割结果输出端口名.
pub const OUTPUT_PORT_SEG: &str = "seg_image";

/// 中间结果目录输出端口名. 该端口不要求下游接收者.
pub const OUTPUT_PORT_SAVED_FOLDER: &str = "saved_images_folder";

/// 肝脏/肿瘤模型的滑动窗口大小 `(z, h, w)`.
pub const LIVER_TUMOR_ROI: Roi = (160, 160, 160);

/// 肝脏/肿瘤模型相邻窗口的重叠比例.
pub const LIVER_TUMOR_OVERLAP: f64 = 0.6;

/// 预处理重采样的目标体素分辨率, 单位为毫米.
pub const LIVER_TUMOR_PIXDIM: [f64; 3] = [1.0, 1.0, 1.0];

/// 预处理强度缩放的 HU 下限.
pub const LIVER_TUMOR_HU_MIN: f32 = -21.0;

/// 预处理强度缩放的 HU 上限.
pub const LIVER_TUMOR_HU_MAX: f32 = 189.0;

/// 环境变量: 覆盖默认的中间结果目录.
pub const OUTPUT_DIR_ENV: &str = "SEG_BERRY_OUTPUT_DIR";
