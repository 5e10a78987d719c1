//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Roi};

pub use crate::data::{Geometry, Image, ImageMeta, LabelImage, Volume, VolumeAttr};
pub use crate::data::{DataRecord, Entry};

pub use crate::consts::gray::{LITS_BACKGROUND, LITS_LIVER, LITS_TUMOR};
pub use crate::consts::{INPUT_KEY, PRED_KEY};

pub use crate::transforms::{InterpMode, Stage, Transform};
pub use crate::Pipeline;

pub use crate::{BlendMode, InfererConfig, SlidingWindowInferer};
pub use crate::{load_model, ModelHandle, SegModel};
pub use crate::{LiverTumorSegOperator, SegConfig, SegInferenceEngine};
pub use crate::{SegError, SegResult};

pub use crate::ports::{InputPort, OptionalOutputPort, OutputPort};
