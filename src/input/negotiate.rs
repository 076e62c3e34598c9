// 该文件是 Hushen （护身） 项目的一部分。
// src/input/negotiate.rs - 摄像头协商
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

use tracing::{debug, info, warn};

use super::camera::{
  CameraCandidate, CameraDevice, CameraDriver, CameraError, CaptureHint, DEFAULT_HINT,
};
use crate::frame::Frame;

/// 协商成功的摄像头，独占设备句柄直到被 drop
pub struct NegotiatedCamera {
  device: Box<dyn CameraDevice>,
  candidate: CameraCandidate,
  /// 协商时已读出的第一帧
  first_frame: Option<Frame>,
}

impl NegotiatedCamera {
  pub fn candidate(&self) -> CameraCandidate {
    self.candidate
  }

  /// 协商时读出的帧，只能取一次
  pub fn take_first_frame(&mut self) -> Option<Frame> {
    self.first_frame.take()
  }

  /// 先返回协商时读出的帧，之后从设备读取
  pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
    if let Some(frame) = self.first_frame.take() {
      return Ok(frame);
    }
    let frame = self.device.read_frame()?;
    if frame.is_empty() {
      return Err(CameraError::EmptyFrame);
    }
    Ok(frame)
  }

  fn apply_hint(&mut self, hint: &CaptureHint) {
    match self.device.apply_hint(hint) {
      Ok(()) => debug!(
        "摄像头 {} 采集参数: {}x{}@{}",
        self.candidate, hint.width, hint.height, hint.fps
      ),
      Err(e) => warn!("摄像头 {} 不接受采集参数: {}", self.candidate, e),
    }
  }
}

impl Drop for NegotiatedCamera {
  fn drop(&mut self) {
    info!("释放摄像头 {}", self.candidate);
  }
}

impl std::fmt::Debug for NegotiatedCamera {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NegotiatedCamera")
      .field("candidate", &self.candidate)
      .field("first_frame_pending", &self.first_frame.is_some())
      .finish()
  }
}

/// 按顺序尝试候选摄像头，返回第一个能打开并读出非空帧的设备。
/// 全部失败时返回 `None`，这不是错误。
pub fn negotiate(
  driver: &dyn CameraDriver,
  candidates: &[CameraCandidate],
) -> Option<NegotiatedCamera> {
  for candidate in candidates {
    let mut device = match driver.open(candidate) {
      Ok(device) => device,
      Err(e) => {
        debug!("摄像头 {} 打开失败: {}", candidate, e);
        continue;
      }
    };

    match device.read_frame() {
      Ok(frame) if !frame.is_empty() => {
        info!(
          "使用摄像头 {} ({}x{})",
          candidate,
          frame.image.width(),
          frame.image.height()
        );
        let mut camera = NegotiatedCamera {
          device,
          candidate: *candidate,
          first_frame: Some(frame),
        };
        camera.apply_hint(&DEFAULT_HINT);
        return Some(camera);
      }
      Ok(_) => debug!("摄像头 {} 返回空帧，释放", candidate),
      Err(e) => debug!("摄像头 {} 读取失败: {}，释放", candidate, e),
    }
    drop(device);
  }

  warn!("没有可用的摄像头，共尝试 {} 个候选", candidates.len());
  None
}
