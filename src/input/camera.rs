// 该文件是 Hushen （护身） 项目的一部分。
// src/input/camera.rs - 摄像头设备抽象
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

use std::fmt;

use thiserror::Error;

use crate::frame::Frame;

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("无法打开摄像头 {candidate}: {reason}")]
  Open {
    candidate: CameraCandidate,
    reason: String,
  },
  #[error("读取帧失败: {0}")]
  Read(String),
  #[error("读取到空帧")]
  EmptyFrame,
  #[error("设置采集参数失败: {0}")]
  Hint(String),
  #[error("未启用摄像头支持")]
  Unsupported,
}

/// 采集后端提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureBackend {
  /// 平台相关后端（Linux 上为 V4L2）
  V4l2,
  /// 由驱动自行选择
  Any,
}

impl fmt::Display for CaptureBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CaptureBackend::V4l2 => write!(f, "v4l2"),
      CaptureBackend::Any => write!(f, "any"),
    }
  }
}

/// 一个候选摄像头：设备序号加后端提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraCandidate {
  pub index: u32,
  pub backend: CaptureBackend,
}

impl CameraCandidate {
  pub const fn new(index: u32, backend: CaptureBackend) -> Self {
    Self { index, backend }
  }
}

impl fmt::Display for CameraCandidate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{} ({})", self.index, self.backend)
  }
}

/// 协商顺序：平台后端，自动检测，再尝试其他设备序号
pub const DEFAULT_CANDIDATES: [CameraCandidate; 4] = [
  CameraCandidate::new(0, CaptureBackend::V4l2),
  CameraCandidate::new(0, CaptureBackend::Any),
  CameraCandidate::new(1, CaptureBackend::Any),
  CameraCandidate::new(2, CaptureBackend::Any),
];

/// 采集参数，只作为提示，设备可以不接受
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHint {
  pub width: u32,
  pub height: u32,
  pub fps: u32,
}

pub const DEFAULT_HINT: CaptureHint = CaptureHint {
  width: 640,
  height: 480,
  fps: 30,
};

/// 已打开的摄像头。drop 即释放设备，设备只在打开它的线程中使用
pub trait CameraDevice {
  /// 阻塞读取下一帧，没有超时
  fn read_frame(&mut self) -> Result<Frame, CameraError>;

  fn apply_hint(&mut self, hint: &CaptureHint) -> Result<(), CameraError>;
}

pub trait CameraDriver: Send + Sync {
  fn open(&self, candidate: &CameraCandidate) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// 没有任何可用摄像头的驱动
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDriver;

impl CameraDriver for NullDriver {
  fn open(&self, _candidate: &CameraCandidate) -> Result<Box<dyn CameraDevice>, CameraError> {
    Err(CameraError::Unsupported)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_candidates_prefer_platform_backend() {
    assert_eq!(DEFAULT_CANDIDATES[0].backend, CaptureBackend::V4l2);
    assert!(DEFAULT_CANDIDATES[1..]
      .iter()
      .all(|c| c.backend == CaptureBackend::Any));
    let indices: Vec<u32> = DEFAULT_CANDIDATES.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 0, 1, 2]);
  }

  #[test]
  fn null_driver_never_opens() {
    assert!(matches!(
      NullDriver.open(&DEFAULT_CANDIDATES[0]),
      Err(CameraError::Unsupported)
    ));
  }

  #[test]
  fn candidate_display() {
    assert_eq!(DEFAULT_CANDIDATES[0].to_string(), "#0 (v4l2)");
  }
}
