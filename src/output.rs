// 该文件是 Hushen （护身） 项目的一部分。
// src/output.rs - 标注、编码与产物输出
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

use std::sync::Arc;

use image::RgbImage;

use crate::model::Detection;

pub mod draw;
mod font;
pub mod policy;

mod artifact_store;
pub use self::artifact_store::{ArtifactStore, PREDICT_DIR, StorageError, file_stem, remove_tree};

pub mod mjpeg;

mod placeholder;
pub use self::placeholder::{
  PLACEHOLDER_HEIGHT, PLACEHOLDER_LINES, PLACEHOLDER_WIDTH, model_not_loaded_overlay,
  placeholder_frame,
};

use self::{
  draw::Draw,
  policy::{AnnotationPolicy, PpePolicy},
};

/// 渲染器与标注策略的组合，静态图任务和实时流共用
#[derive(Clone)]
pub struct Annotator {
  draw: Arc<Draw>,
  policy: Arc<dyn AnnotationPolicy>,
}

impl Annotator {
  pub fn new(draw: Draw, policy: impl AnnotationPolicy + 'static) -> Self {
    Self {
      draw: Arc::new(draw),
      policy: Arc::new(policy),
    }
  }

  /// 使用安全帽标注策略
  pub fn ppe(draw: Draw) -> Self {
    Self::new(draw, PpePolicy::default())
  }

  pub fn draw(&self) -> &Draw {
    &self.draw
  }

  pub fn render(&self, image: &mut RgbImage, detections: &[Detection]) {
    self.draw.render(image, detections, self.policy.as_ref());
  }

  pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
    self.draw.annotate(image, detections, self.policy.as_ref())
  }
}

impl Default for Annotator {
  fn default() -> Self {
    Self::ppe(Draw::default())
  }
}

impl std::fmt::Debug for Annotator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Annotator").finish_non_exhaustive()
  }
}
