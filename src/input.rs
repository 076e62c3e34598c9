// 该文件是 Hushen （护身） 项目的一部分。
// src/input.rs - 图像与摄像头输入
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

mod camera;
pub use self::camera::{
  CameraCandidate, CameraDevice, CameraDriver, CameraError, CaptureBackend, CaptureHint,
  DEFAULT_CANDIDATES, DEFAULT_HINT, NullDriver,
};

mod negotiate;
pub use self::negotiate::{NegotiatedCamera, negotiate};

mod image_source;
pub use self::image_source::{ImageSource, ImageSourceError, guess_content_type};

#[cfg(feature = "v4l2_camera")]
mod v4l2_source;
#[cfg(feature = "v4l2_camera")]
pub use self::v4l2_source::{V4l2Driver, V4l2Source};

/// 按编译特性选择摄像头驱动，未启用摄像头支持时所有候选都无法打开
pub fn default_driver() -> Arc<dyn CameraDriver> {
  #[cfg(feature = "v4l2_camera")]
  {
    Arc::new(V4l2Driver::default())
  }
  #[cfg(not(feature = "v4l2_camera"))]
  {
    Arc::new(NullDriver)
  }
}
