// 该文件是 Hushen （护身） 项目的一部分。
// src/model/engine.rs - 推理引擎适配器
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

//! 引擎在进程启动时加载一次，之后只读共享。加载失败的引擎在整个进程生命周期内
//! 保持不可用，每个入口都先检查可用性，而不会按需重试加载。

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{DetectItem, Detection, Detector, Labels};
use crate::config::ModelConfig;

/// 引擎不可用时对外返回的固定提示
pub const MODEL_NOT_LOADED: &str = "Model not loaded. Please contact administrator.";

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("{}", MODEL_NOT_LOADED)]
  Unavailable,
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 模型地址使用的 URL 方案，例如 `onnx:///opt/models/ppe.onnx`
pub const MODEL_URL_SCHEME: &str = "onnx";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelSourceError {
  #[error("模型地址必须使用 {expected} 方案，实际为 '{found}'")]
  Scheme {
    expected: &'static str,
    found: String,
  },
}

/// 模型文件来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
  /// 配置中指定且存在的模型
  Configured(Url),
  /// 配置模型缺失时使用的默认模型
  Fallback(PathBuf),
}

impl ModelSource {
  /// 方案错误是配置错误，不会退回默认模型
  pub fn resolve(config: &ModelConfig) -> Result<Self, ModelSourceError> {
    if let Some(url) = &config.url {
      if url.scheme() != MODEL_URL_SCHEME {
        return Err(ModelSourceError::Scheme {
          expected: MODEL_URL_SCHEME,
          found: url.scheme().to_string(),
        });
      }
      let path = Path::new(url.path());
      if path.exists() {
        return Ok(ModelSource::Configured(url.clone()));
      }
      warn!("模型文件不存在: {}，尝试默认模型", path.display());
    }
    Ok(ModelSource::Fallback(config.fallback_path.clone()))
  }

  pub fn path(&self) -> &Path {
    match self {
      ModelSource::Configured(url) => Path::new(url.path()),
      ModelSource::Fallback(path) => path,
    }
  }
}

/// 推理引擎适配器
pub struct InferenceEngine {
  detector: Option<Arc<Detector>>,
  labels: Labels,
}

impl std::fmt::Debug for InferenceEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InferenceEngine")
      .field("available", &self.is_available())
      .field("classes", &self.labels.len())
      .finish()
  }
}

impl InferenceEngine {
  pub fn new(detector: Arc<Detector>, labels: Labels) -> Self {
    Self {
      detector: Some(detector),
      labels,
    }
  }

  pub fn unavailable() -> Self {
    Self {
      detector: None,
      labels: Labels::new(Vec::<String>::new()),
    }
  }

  /// 按配置加载模型，失败时返回不可用的引擎
  pub fn load(config: &ModelConfig) -> Self {
    let source = match ModelSource::resolve(config) {
      Ok(source) => source,
      Err(e) => {
        error!("模型配置无效: {}", e);
        return Self::unavailable();
      }
    };
    let labels = match (&source, &config.labels) {
      (ModelSource::Configured(_), Some(path)) => match Labels::from_file(path) {
        Ok(labels) => labels,
        Err(e) => {
          error!("无法读取标签文件 {}: {}", path.display(), e);
          return Self::unavailable();
        }
      },
      _ => Labels::coco(),
    };

    match Self::build_detector(&source, config) {
      Ok(detector) => {
        info!(
          "模型加载成功: {} ({} 个类别)",
          source.path().display(),
          labels.len()
        );
        Self::new(detector, labels)
      }
      Err(e) => {
        error!("模型加载失败: {}", e);
        Self::unavailable()
      }
    }
  }

  #[cfg(feature = "onnx_model")]
  fn build_detector(source: &ModelSource, config: &ModelConfig) -> Result<Arc<Detector>, String> {
    use crate::FromUrl;

    let builder = match source {
      ModelSource::Configured(url) => super::Yolov8Builder::from_url(url).map_err(|e| e.to_string())?,
      ModelSource::Fallback(path) => super::Yolov8Builder::new(path),
    };
    let model = builder
      .confidence(config.confidence)
      .nms_threshold(config.nms_threshold)
      .build()
      .map_err(|e| e.to_string())?;
    Ok(Arc::new(model))
  }

  #[cfg(not(feature = "onnx_model"))]
  fn build_detector(source: &ModelSource, _config: &ModelConfig) -> Result<Arc<Detector>, String> {
    Err(format!(
      "未启用 onnx_model 特性，无法加载 {}",
      source.path().display()
    ))
  }

  pub fn is_available(&self) -> bool {
    self.detector.is_some()
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 对一张已解码的图像运行推理
  pub fn infer(&self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
    let detector = self.detector.as_ref().ok_or(EngineError::Unavailable)?;
    let result = detector
      .infer(image)
      .map_err(|e| EngineError::Inference(e.to_string()))?;

    let detections: Vec<Detection> = result
      .items
      .iter()
      .filter_map(|item| self.to_detection(item))
      .collect();
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }

  fn to_detection(&self, item: &DetectItem) -> Option<Detection> {
    let [x1, y1, x2, y2] = item.bbox;
    if !(x1 < x2 && y1 < y2) {
      debug!("丢弃退化的检测框: {:?}", item.bbox);
      return None;
    }
    Some(Detection {
      class_name: self.labels.name(item.class_id).to_string(),
      confidence: item.score.clamp(0.0, 1.0),
      bbox: item.bbox,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectResult, Model, ModelError};

  struct Fixed(Vec<DetectItem>);

  impl Model for Fixed {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      Ok(DetectResult::from(self.0.clone()))
    }
  }

  struct Broken;

  impl Model for Broken {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      Err("tensor shape mismatch".into())
    }
  }

  #[test]
  fn unavailable_engine_short_circuits() {
    let engine = InferenceEngine::unavailable();
    assert!(!engine.is_available());
    let err = engine.infer(&RgbImage::new(4, 4)).unwrap_err();
    assert!(matches!(err, EngineError::Unavailable));
    assert_eq!(err.to_string(), MODEL_NOT_LOADED);
  }

  #[test]
  fn maps_class_ids_and_drops_degenerate_boxes() {
    let model = Fixed(vec![
      DetectItem {
        class_id: 1,
        score: 0.8,
        bbox: [1.0, 2.0, 10.0, 12.0],
      },
      DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: [5.0, 5.0, 5.0, 9.0],
      },
      DetectItem {
        class_id: 7,
        score: 1.3,
        bbox: [0.0, 0.0, 3.0, 3.0],
      },
    ]);
    let engine = InferenceEngine::new(Arc::new(model), Labels::new(["helmet", "vest"]));

    let detections = engine.infer(&RgbImage::new(16, 16)).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].class_name, "vest");
    assert_eq!(detections[1].class_name, "unknown");
    assert_eq!(detections[1].confidence, 1.0);
  }

  #[test]
  fn model_failure_is_inference_error() {
    let engine = InferenceEngine::new(Arc::new(Broken), Labels::coco());
    let err = engine.infer(&RgbImage::new(4, 4)).unwrap_err();
    assert!(matches!(err, EngineError::Inference(msg) if msg.contains("tensor")));
  }

  #[test]
  fn missing_configured_model_resolves_to_fallback() {
    let config = ModelConfig {
      url: Some(url::Url::parse("onnx:///definitely/not/here.onnx").unwrap()),
      ..ModelConfig::default()
    };
    assert_eq!(
      ModelSource::resolve(&config),
      Ok(ModelSource::Fallback(PathBuf::from(crate::config::DEFAULT_MODEL_PATH)))
    );
  }

  #[test]
  fn foreign_model_scheme_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let present = temp.path().join("ppe.onnx");
    std::fs::write(&present, b"onnx bytes").unwrap();

    let config = ModelConfig {
      url: Some(url::Url::parse(&format!("rknn://{}", present.display())).unwrap()),
      fallback_path: present.clone(),
      ..ModelConfig::default()
    };
    assert_eq!(
      ModelSource::resolve(&config),
      Err(ModelSourceError::Scheme {
        expected: MODEL_URL_SCHEME,
        found: "rknn".to_string(),
      })
    );
    // 方案错误时不退回默认模型
    assert!(!InferenceEngine::load(&config).is_available());

    let config = ModelConfig {
      url: Some(url::Url::parse(&format!("onnx://{}", present.display())).unwrap()),
      ..ModelConfig::default()
    };
    let source = ModelSource::resolve(&config).unwrap();
    assert!(matches!(source, ModelSource::Configured(_)));
    assert_eq!(source.path(), present.as_path());
  }

  #[test]
  fn load_without_any_model_file_is_unavailable() {
    let config = ModelConfig {
      fallback_path: PathBuf::from("/definitely/not/here/either.onnx"),
      ..ModelConfig::default()
    };
    assert!(!InferenceEngine::load(&config).is_available());
  }
}
