// 该文件是 Hushen （护身） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头
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

use std::{pin::Pin, time::Instant};

use image::RgbImage;
use tracing::debug;
use v4l::{
  FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, prelude::*,
  video::Capture, video::capture::Parameters,
};

use super::camera::{
  CameraCandidate, CameraDevice, CameraDriver, CameraError, CaptureHint, DEFAULT_HINT,
};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

/// 按 `/dev/video{序号}` 打开设备，两种后端提示都走 V4L2
#[derive(Debug, Clone, Default)]
pub struct V4l2Driver;

impl CameraDriver for V4l2Driver {
  fn open(&self, candidate: &CameraCandidate) -> Result<Box<dyn CameraDevice>, CameraError> {
    let path = format!("/dev/video{}", candidate.index);
    let source = V4l2Source::new(&path).map_err(|reason| CameraError::Open {
      candidate: *candidate,
      reason,
    })?;
    Ok(Box::new(source))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
  Yuyv,
  Mjpeg,
  Rgb,
}

/// V4L2 摄像头
///
/// `Stream` 借用 `Device`，设备放在 `Pin<Box>` 中保证地址稳定，
/// 再把借用延长为 `'static` 存入同一结构体。
pub struct V4l2Source {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  layout: PixelLayout,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl V4l2Source {
  pub fn new(device_path: &str) -> Result<Self, String> {
    let device = Box::pin(
      Device::with_path(device_path).map_err(|e| format!("无法打开设备 {}: {}", device_path, e))?,
    );

    let mut format = device.format().map_err(|e| format!("无法读取格式: {}", e))?;
    format.width = DEFAULT_HINT.width;
    format.height = DEFAULT_HINT.height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| format!("无法设置格式: {}", e))?;

    let layout = match &format.fourcc.repr {
      b"YUYV" => PixelLayout::Yuyv,
      b"MJPG" => PixelLayout::Mjpeg,
      b"RGB3" => PixelLayout::Rgb,
      other => {
        return Err(format!(
          "不支持的像素格式: {}",
          String::from_utf8_lossy(other)
        ));
      }
    };
    debug!(
      "{}: {}x{} {:?}",
      device_path, format.width, format.height, layout
    );

    let mut source = Self {
      device,
      stream: None,
      layout,
      width: format.width,
      height: format.height,
      frame_index: 0,
      start_time: Instant::now(),
    };

    // SAFETY: device 固定在堆上且不会移动；stream 在 Drop 中先于 device 释放
    let stream = unsafe {
      let device_ref: &Device = &source.device;
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)
        .map_err(|e| format!("无法创建捕获流: {}", e))?
    };
    source.stream = Some(stream);
    Ok(source)
  }

  fn decode(&self, buffer: &[u8]) -> Result<RgbImage, CameraError> {
    match self.layout {
      PixelLayout::Yuyv => {
        let rgb = yuyv_to_rgb(buffer, self.width, self.height);
        RgbImage::from_raw(self.width, self.height, rgb)
          .ok_or_else(|| CameraError::Read("YUYV 数据长度不足".to_string()))
      }
      PixelLayout::Mjpeg => image::load_from_memory(buffer)
        .map(|img| img.to_rgb8())
        .map_err(|e| CameraError::Read(e.to_string())),
      PixelLayout::Rgb => {
        let len = (self.width * self.height * 3) as usize;
        let data = buffer.get(..len).map(<[u8]>::to_vec);
        data
          .and_then(|data| RgbImage::from_raw(self.width, self.height, data))
          .ok_or_else(|| CameraError::Read("RGB 数据长度不足".to_string()))
      }
    }
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    self.stream.take();
  }
}

impl CameraDevice for V4l2Source {
  fn read_frame(&mut self) -> Result<Frame, CameraError> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| CameraError::Read("捕获流已关闭".to_string()))?;
    let buffer = {
      let (buffer, _meta) = stream
        .next()
        .map_err(|e| CameraError::Read(e.to_string()))?;
      buffer.to_vec()
    };

    let image = self.decode(&buffer)?;
    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }

  fn apply_hint(&mut self, hint: &CaptureHint) -> Result<(), CameraError> {
    self
      .device
      .set_params(&Parameters::with_fps(hint.fps))
      .map_err(|e| CameraError::Hint(e.to_string()))?;
    if (self.width, self.height) != (hint.width, hint.height) {
      return Err(CameraError::Hint(format!(
        "设备分辨率为 {}x{}",
        self.width, self.height
      )));
    }
    Ok(())
  }
}

/// YUYV 4:2:2 转 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}
