// 该文件是 Hushen （护身） 项目的一部分。
// src/output/placeholder.rs - 无摄像头占位帧与提示叠加
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

use image::{Rgb, RgbImage};

use super::draw::Draw;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

/// 占位帧上的提示文字，自上而下
pub const PLACEHOLDER_LINES: [&str; 3] = [
  "No Camera Available",
  "Please check camera connection",
  "or try a different browser",
];

const OVERLAY_TEXT: &str = "YOLO Model Not Loaded";
const OVERLAY_ORIGIN: (i32, i32) = (10, 30);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const OVERLAY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 640x480 黑底，居中显示提示文字
pub fn placeholder_frame(draw: &Draw) -> RgbImage {
  let mut image = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
  let layout = [(216, 24.0), (264, 16.0), (296, 16.0)];
  for (text, (y, size)) in PLACEHOLDER_LINES.iter().zip(layout) {
    draw.draw_text_centered(&mut image, text, y, TEXT_COLOR, size);
  }
  image
}

/// 模型未加载时在帧左上角叠加红色提示
pub fn model_not_loaded_overlay(draw: &Draw, image: &mut RgbImage) {
  let (x, y) = OVERLAY_ORIGIN;
  draw.draw_text(image, OVERLAY_TEXT, x, y, OVERLAY_COLOR, 24.0);
}
