// 该文件是 Hushen （护身） 项目的一部分。
// src/input/image_source.rs - 静态图片输入
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

use image::{ImageFormat, ImageReader, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageSourceError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法解码图片: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 一张已解码的上传图片
#[derive(Debug)]
pub struct ImageSource {
  image: RgbImage,
}

impl ImageSource {
  /// 按文件内容而不是扩展名判断格式
  pub fn open(path: &Path) -> Result<Self, ImageSourceError> {
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .to_rgb8();
    Ok(Self { image })
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

/// 由文件扩展名推断 MIME 类型
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
  ImageFormat::from_path(path).ok().map(|f| f.to_mime_type())
}
