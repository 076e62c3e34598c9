// 该文件是 Hushen （护身） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 检测模型
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

use std::path::{Path, PathBuf};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNchwFrame,
  model::{DetectItem, DetectResult, MODEL_URL_SCHEME, Model, ModelError},
};

const YOLOV8_INPUT_SIZE: u32 = 640;
const YOLOV8_BOX_DIMS: usize = 4;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("tract 错误: {0}")]
  TractError(String),
  #[error("模型输出形状无效: {0:?}")]
  OutputShape(Vec<usize>),
}

impl From<TractError> for Yolov8Error {
  fn from(err: TractError) -> Self {
    Yolov8Error::TractError(err.to_string())
  }
}

pub struct Yolov8Builder {
  model_path: PathBuf,
  input_size: u32,
  confidence: f32,
  nms_threshold: f32,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = MODEL_URL_SCHEME;
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案，实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(Self::new(url.path()))
  }
}

impl Yolov8Builder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      input_size: YOLOV8_INPUT_SIZE,
      confidence: 0.25,
      nms_threshold: 0.45,
    }
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn nms_threshold(mut self, nms_threshold: f32) -> Self {
    self.nms_threshold = nms_threshold;
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    if !self.model_path.exists() {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let side = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(0, f32::fact([1, 3, side, side]).into())?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成");

    Ok(Yolov8 {
      plan,
      input_size: self.input_size,
      confidence: self.confidence,
      nms_threshold: self.nms_threshold,
    })
  }
}

/// tract 运行的 YOLOv8 检测器，输出 `[1, 4 + nc, anchors]`
pub struct Yolov8 {
  plan: TypedRunnableModel<TypedModel>,
  input_size: u32,
  confidence: f32,
  nms_threshold: f32,
}

impl Yolov8 {
  /// 缩放到模型输入尺寸并转为 NCHW 张量
  fn preprocess(&self, image: &RgbImage) -> Result<Tensor, Yolov8Error> {
    let resized = image::imageops::resize(
      image,
      self.input_size,
      self.input_size,
      FilterType::Triangle,
    );
    let frame = RgbNchwFrame::from(&resized);
    let side = self.input_size as usize;
    Ok(Tensor::from_shape(&[1, 3, side, side], frame.as_nchw())?)
  }

  fn postprocess(
    &self,
    output: &Tensor,
    original_width: f32,
    original_height: f32,
  ) -> Result<DetectResult, Yolov8Error> {
    let view = output.to_array_view::<f32>()?;
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
      return Err(Yolov8Error::OutputShape(shape));
    }

    // 部分导出的模型为 [1, anchors, 4 + nc]
    let transposed = shape[1] > shape[2];
    let (dims, anchors) = if transposed {
      (shape[2], shape[1])
    } else {
      (shape[1], shape[2])
    };
    if dims <= YOLOV8_BOX_DIMS {
      return Err(Yolov8Error::OutputShape(shape));
    }
    let value = |d: usize, a: usize| -> f32 {
      if transposed { view[[0, a, d]] } else { view[[0, d, a]] }
    };

    let scale_x = original_width / self.input_size as f32;
    let scale_y = original_height / self.input_size as f32;
    let mut items = Vec::new();

    for a in 0..anchors {
      let (class_id, score) = (YOLOV8_BOX_DIMS..dims)
        .map(|d| ((d - YOLOV8_BOX_DIMS) as u32, value(d, a)))
        .fold((0u32, f32::MIN), |best, cur| {
          if cur.1 > best.1 { cur } else { best }
        });

      if score < self.confidence {
        continue;
      }

      let cx = value(0, a);
      let cy = value(1, a);
      let w = value(2, a);
      let h = value(3, a);

      let x_min = ((cx - w / 2.0) * scale_x).clamp(0.0, original_width);
      let y_min = ((cy - h / 2.0) * scale_y).clamp(0.0, original_height);
      let x_max = ((cx + w / 2.0) * scale_x).clamp(0.0, original_width);
      let y_max = ((cy + h / 2.0) * scale_y).clamp(0.0, original_height);

      items.push(DetectItem {
        class_id,
        score,
        bbox: [x_min, y_min, x_max, y_max],
      });
    }

    let items = nms(items, self.nms_threshold);
    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

impl Model for Yolov8 {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &RgbImage) -> Result<DetectResult, ModelError> {
    let tensor = self.preprocess(input)?;
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(Yolov8Error::from)?;
    let output = outputs
      .first()
      .ok_or_else(|| Yolov8Error::OutputShape(Vec::new()))?;
    Ok(self.postprocess(output, input.width() as f32, input.height() as f32)?)
  }
}

/// 按类别进行非极大值抑制
fn nms(mut items: Vec<DetectItem>, threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem> = Vec::new();
  for item in items {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == item.class_id && iou(&kept.bbox, &item.bbox) >= threshold);
    if !suppressed {
      result.push(item);
    }
  }
  result
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
