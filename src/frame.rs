// 该文件是 Hushen （护身） 项目的一部分。
// src/frame.rs - 帧与 NCHW 张量布局
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

const RGB_CHANNELS: usize = 3;

/// 一帧已解码的图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  /// 帧是否为空（宽或高为 0）
  pub fn is_empty(&self) -> bool {
    self.image.width() == 0 || self.image.height() == 0
  }
}

/// 归一化到 [0, 1] 的 NCHW 浮点帧，作为模型输入
#[derive(Debug, Clone)]
pub struct RgbNchwFrame {
  data: Box<[f32]>,
  width: usize,
  height: usize,
}

impl RgbNchwFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    Self {
      data: vec![0.0f32; RGB_CHANNELS * width * height].into_boxed_slice(),
      width,
      height,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  pub fn into_raw(self) -> Vec<f32> {
    self.data.into_vec()
  }
}

impl From<&RgbImage> for RgbNchwFrame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = RgbNchwFrame::with_shape(height as usize, width as usize);
    let plane = frame.width * frame.height;

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * frame.width + x as usize;
      for c in 0..RGB_CHANNELS {
        frame.data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    frame
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn nchw_layout_splits_channels_into_planes() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));
    image.put_pixel(1, 0, Rgb([0, 255, 51]));

    let frame = RgbNchwFrame::from(&image);
    let data = frame.as_nchw();

    assert_eq!(data.len(), 6);
    assert_eq!(&data[0..2], &[1.0, 0.0]);
    assert_eq!(&data[2..4], &[0.0, 1.0]);
    assert!((data[5] - 0.2).abs() < 1e-6);
  }

  #[test]
  fn zero_sized_frame_is_empty() {
    let frame = Frame::new(RgbImage::new(0, 480), 0, 0);
    assert!(frame.is_empty());
    assert!(!Frame::new(RgbImage::new(1, 1), 0, 0).is_empty());
  }
}
