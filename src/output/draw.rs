// 该文件是 Hushen （护身） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use super::{font, policy::AnnotationPolicy};
use crate::model::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 4;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0]; // 黑色

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法解析字体文件: {0}")]
  InvalidFont(String),
}

pub enum LabelFont {
  Truetype(FontArc),
  Bitmap,
}

/// 标注渲染器，字号和颜色为固定常量
pub struct Draw {
  font: LabelFont,
  font_size: f32,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: LabelFont::Bitmap,
      font_size: LABEL_FONT_SIZE,
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(LABEL_TEXT_COLOR),
    }
  }
}

impl Draw {
  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("使用标签字体: {}", path.display());
    Ok(Self {
      font: LabelFont::Truetype(font),
      ..Self::default()
    })
  }

  /// 按配置选择字体，未配置时使用内置点阵字体
  pub fn from_font_option(path: Option<&Path>) -> Result<Self, DrawError> {
    match path {
      Some(path) => Self::with_font_file(path),
      None => Ok(Self::default()),
    }
  }

  /// 在图像上绘制所有检测框和标签，空检测列表时图像保持不变
  pub fn render(&self, image: &mut RgbImage, detections: &[Detection], policy: &dyn AnnotationPolicy) {
    for detection in detections {
      let label = policy.display_label(&detection.class_name, detection.confidence);
      self.draw_bbox_with_label(image, detection, &label);
    }
  }

  /// 返回绘制后的副本
  pub fn annotate(
    &self,
    image: &RgbImage,
    detections: &[Detection],
    policy: &dyn AnnotationPolicy,
  ) -> RgbImage {
    let mut output = image.clone();
    self.render(&mut output, detections, policy);
    output
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection, label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let (x1, y1, x2, y2) = detection.corners();
    let x_min = x1.clamp(0, w - 1);
    let y_min = y1.clamp(0, h - 1);
    let x_max = x2.clamp(0, w - 1);
    let y_max = y2.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }

    // 标签放在框的左上角上方
    let (text_w, text_h) = self.text_size(label, self.font_size);
    let label_x = x_min;
    let label_y = (y_min - text_h as i32 - LABEL_OFFSET).max(0);
    let bg_w = (text_w as i32 + 2 * LABEL_PADDING).min(w - label_x);
    let bg_h = text_h as i32 + 2 * LABEL_PADDING;

    if bg_w > 0 && bg_h > 0 {
      let rect = Rect::at(label_x, label_y).of_size(bg_w as u32, bg_h as u32);
      draw_filled_rect_mut(image, rect, self.box_color);
    }

    self.draw_text(
      image,
      label,
      label_x + LABEL_PADDING,
      label_y + LABEL_PADDING,
      self.text_color,
      self.font_size,
    );
  }

  pub fn text_size(&self, text: &str, font_size: f32) -> (u32, u32) {
    match &self.font {
      LabelFont::Truetype(font) => imageproc::drawing::text_size(PxScale::from(font_size), font, text),
      LabelFont::Bitmap => font::text_size(text, font::scale_for(font_size)),
    }
  }

  pub fn draw_text(
    &self,
    image: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    color: Rgb<u8>,
    font_size: f32,
  ) {
    match &self.font {
      LabelFont::Truetype(font) => {
        draw_text_mut(image, color, x, y, PxScale::from(font_size), font, text)
      }
      LabelFont::Bitmap => font::draw_text(image, color, x, y, font::scale_for(font_size), text),
    }
  }

  /// 水平居中绘制一行文本
  pub fn draw_text_centered(
    &self,
    image: &mut RgbImage,
    text: &str,
    y: i32,
    color: Rgb<u8>,
    font_size: f32,
  ) {
    let (text_w, _) = self.text_size(text, font_size);
    let x = ((image.width() as i32 - text_w as i32) / 2).max(0);
    self.draw_text(image, text, x, y, color, font_size);
  }
}
