// 该文件是 Hushen （护身） 项目的一部分。
// src/model.rs - 模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Hushen 项目贡献者

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// 推理模型。实现需要支持并发调用 `infer`，
/// 不支持并发的后端应在内部自行串行化。
pub trait Model: Send + Sync {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 检测器后端统一使用的错误类型
pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

/// 引擎适配器持有的检测器
pub type Detector = dyn Model<Input = RgbImage, Output = DetectResult, Error = ModelError>;

/// 模型原始输出的一个检测框
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 一条检测记录，每次推理新生成，之后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "class")]
  pub class_name: String,
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: [f32; 4],
}

impl Detection {
  /// 取整后的框坐标 (x1, y1, x2, y2)
  pub fn corners(&self) -> (i32, i32, i32, i32) {
    (
      self.bbox[0] as i32,
      self.bbox[1] as i32,
      self.bbox[2] as i32,
      self.bbox[3] as i32,
    )
  }
}

mod engine;
mod labels;
#[cfg(feature = "onnx_model")]
mod yolov8;

pub use self::engine::{
  EngineError, InferenceEngine, MODEL_NOT_LOADED, MODEL_URL_SCHEME, ModelSource, ModelSourceError,
};
pub use self::labels::{COCO_CLASSES, Labels, LabelsError};
#[cfg(feature = "onnx_model")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};
