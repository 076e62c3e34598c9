// 该文件是 Hushen （护身） 项目的一部分。
// tests/common/mod.rs - 集成测试公共替身
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

#![allow(dead_code)]

use std::{
  collections::{HashMap, VecDeque},
  io::Cursor,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use image::{ImageFormat, Rgb, RgbImage};

use hushen::{
  frame::Frame,
  input::{CameraCandidate, CameraDevice, CameraDriver, CameraError, CaptureHint},
  model::{DetectItem, DetectResult, InferenceEngine, Labels, Model, ModelError},
};

/// 按脚本依次返回结果的模型，脚本用完后返回默认结果
#[derive(Default)]
pub struct ScriptedModel {
  script: Mutex<VecDeque<Result<Vec<DetectItem>, String>>>,
  default: Vec<DetectItem>,
  pub calls: AtomicUsize,
}

impl ScriptedModel {
  pub fn always(items: Vec<DetectItem>) -> Self {
    Self {
      default: items,
      ..Self::default()
    }
  }

  pub fn then(self, step: Result<Vec<DetectItem>, &str>) -> Self {
    self
      .script
      .lock()
      .unwrap()
      .push_back(step.map_err(str::to_string));
    self
  }
}

impl Model for ScriptedModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let step = self.script.lock().unwrap().pop_front();
    match step {
      Some(Ok(items)) => Ok(DetectResult::from(items)),
      Some(Err(message)) => Err(message.into()),
      None => Ok(DetectResult::from(self.default.clone())),
    }
  }
}

pub fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
  DetectItem {
    class_id,
    score,
    bbox,
  }
}

pub fn ppe_labels() -> Labels {
  Labels::new(["helmet", "vest", "person"])
}

pub fn engine_with(model: ScriptedModel) -> Arc<InferenceEngine> {
  Arc::new(InferenceEngine::new(Arc::new(model), ppe_labels()))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 150]));
  let mut out = Cursor::new(Vec::new());
  image.write_to(&mut out, ImageFormat::Png).unwrap();
  out.into_inner()
}

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
  FailOpen,
  EmptyFrame,
  FailRead,
  /// 正常出帧，读满给定帧数后读取失败
  Frames(u64),
  /// 不停产生 640x480 的随机噪声帧，编码后体积大
  Noise,
}

#[derive(Default)]
pub struct Counters {
  pub open_attempts: AtomicUsize,
  pub opened: AtomicUsize,
  pub released: AtomicUsize,
  pub hints: AtomicUsize,
}

impl Counters {
  pub fn get(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
  }
}

/// 按候选配置行为的摄像头驱动，未配置的候选无法打开
#[derive(Clone, Default)]
pub struct FakeDriver {
  behaviours: HashMap<CameraCandidate, Behaviour>,
  pub counters: Arc<Counters>,
}

impl FakeDriver {
  pub fn with(mut self, candidate: CameraCandidate, behaviour: Behaviour) -> Self {
    self.behaviours.insert(candidate, behaviour);
    self
  }
}

impl CameraDriver for FakeDriver {
  fn open(&self, candidate: &CameraCandidate) -> Result<Box<dyn CameraDevice>, CameraError> {
    self.counters.open_attempts.fetch_add(1, Ordering::SeqCst);
    let behaviour = match self.behaviours.get(candidate) {
      None | Some(Behaviour::FailOpen) => {
        return Err(CameraError::Open {
          candidate: *candidate,
          reason: "no such device".to_string(),
        });
      }
      Some(behaviour) => *behaviour,
    };
    self.counters.opened.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(FakeCamera {
      behaviour,
      next_index: 0,
      seed: 0x9e37_79b9,
      counters: self.counters.clone(),
    }))
  }
}

pub struct FakeCamera {
  behaviour: Behaviour,
  next_index: u64,
  seed: u32,
  counters: Arc<Counters>,
}

impl FakeCamera {
  // xorshift32
  fn next_noise(&mut self) -> u8 {
    self.seed ^= self.seed << 13;
    self.seed ^= self.seed >> 17;
    self.seed ^= self.seed << 5;
    (self.seed >> 24) as u8
  }
}

impl CameraDevice for FakeCamera {
  fn read_frame(&mut self) -> Result<Frame, CameraError> {
    match self.behaviour {
      Behaviour::FailOpen | Behaviour::FailRead => Err(CameraError::Read("device busy".to_string())),
      Behaviour::EmptyFrame => Ok(Frame::new(RgbImage::new(0, 0), 0, 0)),
      Behaviour::Frames(limit) if self.next_index >= limit => {
        Err(CameraError::Read("disconnected".to_string()))
      }
      Behaviour::Frames(_) => {
        let index = self.next_index;
        self.next_index += 1;
        let image = RgbImage::from_pixel(320, 240, Rgb([100, 100, 100]));
        Ok(Frame::new(image, index, index * 33))
      }
      Behaviour::Noise => {
        let index = self.next_index;
        self.next_index += 1;
        let mut image = RgbImage::new(640, 480);
        for pixel in image.pixels_mut() {
          *pixel = Rgb([self.next_noise(), self.next_noise(), self.next_noise()]);
        }
        Ok(Frame::new(image, index, index * 33))
      }
    }
  }

  fn apply_hint(&mut self, _hint: &CaptureHint) -> Result<(), CameraError> {
    self.counters.hints.fetch_add(1, Ordering::SeqCst);
    Err(CameraError::Hint("fixed mode".to_string()))
  }
}

impl Drop for FakeCamera {
  fn drop(&mut self) {
    self.counters.released.fetch_add(1, Ordering::SeqCst);
  }
}
