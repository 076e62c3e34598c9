// 该文件是 Hushen （护身） 项目的一部分。
// src/config.rs - 服务配置
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

use std::path::PathBuf;

use url::Url;

/// 上传文件大小上限（10 MiB）
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// 配置的模型不存在时回退使用的默认模型
pub const DEFAULT_MODEL_PATH: &str = "models/yolov8n.onnx";

/// 媒体根目录下保存上传原图的子目录
pub const UPLOADS_DIR: &str = "uploads";

/// 媒体根目录下保存任务输出的子目录
pub const OUTPUTS_DIR: &str = "outputs";

/// 模型加载配置
#[derive(Debug, Clone)]
pub struct ModelConfig {
  /// 模型地址，例如 `onnx:///opt/models/ppe.onnx`
  pub url: Option<Url>,
  /// 类别名称文件（JSON）
  pub labels: Option<PathBuf>,
  /// 配置模型不存在时的回退模型
  pub fallback_path: PathBuf,
  pub confidence: f32,
  pub nms_threshold: f32,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      url: None,
      labels: None,
      fallback_path: PathBuf::from(DEFAULT_MODEL_PATH),
      confidence: 0.25,
      nms_threshold: 0.45,
    }
  }
}

/// 服务整体配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
  /// 产物根目录，所有相对路径都以此为基准
  pub media_root: PathBuf,
  /// 对外暴露产物时使用的 URL 前缀
  pub media_url: String,
  /// 任务数据库路径
  pub database: PathBuf,
  /// HTTP 监听地址
  pub bind: String,
  /// 实时流 JPEG 编码质量 (1-100)
  pub jpeg_quality: u8,
  /// 标签字体文件，不设置时使用内置点阵字体
  pub font: Option<PathBuf>,
  pub model: ModelConfig,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      media_root: PathBuf::from("media"),
      media_url: "/media/".to_string(),
      database: PathBuf::from("hushen.db"),
      bind: "127.0.0.1:8000".to_string(),
      jpeg_quality: 80,
      font: None,
      model: ModelConfig::default(),
    }
  }
}

impl ServiceConfig {
  /// 将产物相对路径转换为对外地址
  pub fn locator(&self, relative: &str) -> String {
    media_locator(&self.media_url, relative)
  }
}

/// 拼接 URL 前缀和产物相对路径
pub fn media_locator(prefix: &str, relative: &str) -> String {
  let prefix = prefix.trim_end_matches('/');
  let relative = relative.replace('\\', "/");
  format!("{}/{}", prefix, relative.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn locator_joins_prefix_and_relative_path() {
    let config = ServiceConfig::default();
    assert_eq!(
      config.locator("outputs/7/predict/a.jpg"),
      "/media/outputs/7/predict/a.jpg"
    );

    let config = ServiceConfig {
      media_url: "https://cdn.example.com/m".to_string(),
      ..ServiceConfig::default()
    };
    assert_eq!(config.locator("/uploads/b.png"), "https://cdn.example.com/m/uploads/b.png");
  }
}
