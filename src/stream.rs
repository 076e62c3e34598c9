// 该文件是 Hushen （护身） 项目的一部分。
// src/stream.rs - 实时检测流
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

//! 每次迭代产出一个已分块的 JPEG 帧。流独占协商到的摄像头，
//! 流结束、被 drop 或被取消时摄像头随之释放。

use std::{
  sync::{Arc, Condvar, Mutex},
  time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
  input::{CameraCandidate, CameraDriver, NegotiatedCamera, negotiate},
  model::{EngineError, InferenceEngine},
  output::{
    Annotator,
    mjpeg::{encode_jpeg, frame_chunk},
    model_not_loaded_overlay, placeholder_frame,
  },
};

/// 占位帧的发送间隔
pub const PLACEHOLDER_INTERVAL: Duration = Duration::from_secs(1);

/// 可在线程间共享的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    let (lock, cvar) = &*self.inner;
    let mut cancelled = lock.lock().unwrap_or_else(|p| p.into_inner());
    *cancelled = true;
    cvar.notify_all();
  }

  pub fn is_cancelled(&self) -> bool {
    let (lock, _) = &*self.inner;
    *lock.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// 最多等待 `timeout`，返回是否已被取消
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let (lock, cvar) = &*self.inner;
    let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
    match cvar.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
      Ok((cancelled, _)) => *cancelled,
      Err(poisoned) => *poisoned.into_inner().0,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
  pub jpeg_quality: u8,
  pub placeholder_interval: Duration,
}

impl Default for StreamOptions {
  fn default() -> Self {
    Self {
      jpeg_quality: 80,
      placeholder_interval: PLACEHOLDER_INTERVAL,
    }
  }
}

enum Source {
  Live(NegotiatedCamera),
  Placeholder { chunk: Vec<u8>, emitted: bool },
  Finished,
}

/// 实时检测流，只能消费一次
pub struct FrameStream {
  source: Source,
  engine: Arc<InferenceEngine>,
  annotator: Annotator,
  options: StreamOptions,
  cancel: CancelToken,
  frames: u64,
}

impl FrameStream {
  /// 协商摄像头并创建流，没有可用摄像头时产出占位帧
  pub fn open(
    driver: &dyn CameraDriver,
    candidates: &[CameraCandidate],
    engine: Arc<InferenceEngine>,
    annotator: Annotator,
    options: StreamOptions,
    cancel: CancelToken,
  ) -> Self {
    let source = match negotiate(driver, candidates) {
      Some(camera) => {
        info!("实时流使用摄像头 {}", camera.candidate());
        Source::Live(camera)
      }
      None => {
        let image = placeholder_frame(annotator.draw());
        match encode_jpeg(&image, options.jpeg_quality) {
          Ok(jpeg) => {
            info!("没有摄像头，实时流输出占位帧");
            Source::Placeholder {
              chunk: frame_chunk(&jpeg),
              emitted: false,
            }
          }
          Err(e) => {
            error!("占位帧编码失败: {}", e);
            Source::Finished
          }
        }
      }
    };

    Self {
      source,
      engine,
      annotator,
      options,
      cancel,
      frames: 0,
    }
  }

  pub fn is_live(&self) -> bool {
    matches!(self.source, Source::Live(_))
  }

  pub fn is_placeholder(&self) -> bool {
    matches!(self.source, Source::Placeholder { .. })
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  /// 结束流并释放摄像头
  fn finish(&mut self) {
    if !matches!(self.source, Source::Finished) {
      debug!("实时流结束，共输出 {} 帧", self.frames);
    }
    self.source = Source::Finished;
  }

  fn next_live(&mut self) -> Option<Vec<u8>> {
    loop {
      if self.cancel.is_cancelled() {
        self.finish();
        return None;
      }

      let Source::Live(camera) = &mut self.source else {
        return None;
      };
      let frame = match camera.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
          warn!("摄像头 {} 读取失败，结束实时流: {}", camera.candidate(), e);
          self.finish();
          return None;
        }
      };

      let index = frame.index;
      let mut image = frame.image;
      match self.engine.infer(&image) {
        Ok(detections) => self.annotator.render(&mut image, &detections),
        Err(EngineError::Unavailable) => model_not_loaded_overlay(self.annotator.draw(), &mut image),
        Err(e) => warn!("第 {} 帧处理失败，输出原始帧: {}", index, e),
      }

      match encode_jpeg(&image, self.options.jpeg_quality) {
        Ok(jpeg) => {
          self.frames += 1;
          return Some(frame_chunk(&jpeg));
        }
        Err(e) => warn!("第 {} 帧编码失败，跳过: {}", index, e),
      }
    }
  }

  fn next_placeholder(&mut self) -> Option<Vec<u8>> {
    let interval = self.options.placeholder_interval;
    let Source::Placeholder { chunk, emitted } = &mut self.source else {
      return None;
    };
    if *emitted && self.cancel.wait_timeout(interval) {
      self.finish();
      return None;
    }
    if self.cancel.is_cancelled() {
      self.finish();
      return None;
    }
    *emitted = true;
    let chunk = chunk.clone();
    self.frames += 1;
    Some(chunk)
  }
}

impl Iterator for FrameStream {
  type Item = Vec<u8>;

  fn next(&mut self) -> Option<Self::Item> {
    match self.source {
      Source::Live(_) => self.next_live(),
      Source::Placeholder { .. } => self.next_placeholder(),
      Source::Finished => None,
    }
  }
}

impl Drop for FrameStream {
  fn drop(&mut self) {
    self.finish();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::NullDriver;
  use std::{thread, time::Instant};

  #[test]
  fn cancel_wakes_waiters() {
    let token = CancelToken::new();
    assert!(!token.wait_timeout(Duration::from_millis(10)));

    let remote = token.clone();
    let started = Instant::now();
    let handle = thread::spawn(move || remote.wait_timeout(Duration::from_secs(10)));
    thread::sleep(Duration::from_millis(50));
    token.cancel();
    assert!(handle.join().unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(token.is_cancelled());
  }

  #[test]
  fn placeholder_stream_stops_when_cancelled() {
    let cancel = CancelToken::new();
    let mut stream = FrameStream::open(
      &NullDriver,
      &crate::input::DEFAULT_CANDIDATES,
      Arc::new(InferenceEngine::unavailable()),
      Annotator::default(),
      StreamOptions {
        placeholder_interval: Duration::from_millis(20),
        ..StreamOptions::default()
      },
      cancel.clone(),
    );
    assert!(stream.is_placeholder());
    assert!(stream.next().is_some());
    assert!(stream.next().is_some());
    cancel.cancel();
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
  }
}
