// 该文件是 Hushen （护身） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, Subcommand};
use url::Url;

use hushen::config::{ModelConfig, ServiceConfig};

/// Hushen 安全防护装备检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输出调试日志
  #[arg(long, short, global = true)]
  pub verbose: bool,

  #[command(flatten)]
  pub service: ServiceArgs,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 启动 HTTP 服务
  Serve,
  /// 对一张图片运行检测任务并输出 JSON 结果
  Detect {
    /// 图片文件路径
    #[arg(long, value_name = "FILE")]
    image: PathBuf,
  },
  /// 检查模型、摄像头和目录是否就绪
  Check,
  /// 创建服务所需的目录
  Setup,
}

#[derive(clap::Args, Debug)]
pub struct ServiceArgs {
  /// 模型地址，例如 onnx:///opt/models/ppe.onnx
  #[arg(long, env = "HUSHEN_MODEL", global = true, value_name = "MODEL")]
  pub model: Option<Url>,

  /// 类别名称文件（JSON 数组或对象）
  #[arg(long, env = "HUSHEN_LABELS", global = true, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 配置模型不存在时使用的默认模型
  #[arg(
    long,
    env = "HUSHEN_FALLBACK_MODEL",
    global = true,
    default_value = hushen::config::DEFAULT_MODEL_PATH,
    value_name = "FILE"
  )]
  pub fallback_model: PathBuf,

  /// 产物根目录
  #[arg(long, env = "HUSHEN_MEDIA_ROOT", global = true, default_value = "media")]
  pub media_root: PathBuf,

  /// 产物对外 URL 前缀
  #[arg(long, env = "HUSHEN_MEDIA_URL", global = true, default_value = "/media/")]
  pub media_url: String,

  /// 任务数据库路径
  #[arg(long, env = "HUSHEN_DATABASE", global = true, default_value = "hushen.db")]
  pub database: PathBuf,

  /// HTTP 监听地址
  #[arg(long, env = "HUSHEN_BIND", global = true, default_value = "127.0.0.1:8000")]
  pub bind: String,

  /// 实时流 JPEG 质量 (1-100)
  #[arg(
    long,
    env = "HUSHEN_JPEG_QUALITY",
    global = true,
    default_value = "80",
    value_parser = clap::value_parser!(u8).range(1..=100)
  )]
  pub jpeg_quality: u8,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "HUSHEN_CONFIDENCE", global = true, default_value = "0.25")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "HUSHEN_NMS_THRESHOLD", global = true, default_value = "0.45")]
  pub nms_threshold: f32,

  /// 标签字体文件（TTF/OTF），不设置时使用内置点阵字体
  #[arg(long, env = "HUSHEN_FONT", global = true, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

impl ServiceArgs {
  pub fn into_config(self) -> ServiceConfig {
    ServiceConfig {
      media_root: self.media_root,
      media_url: self.media_url,
      database: self.database,
      bind: self.bind,
      jpeg_quality: self.jpeg_quality,
      font: self.font,
      model: ModelConfig {
        url: self.model,
        labels: self.labels,
        fallback_path: self.fallback_model,
        confidence: self.confidence,
        nms_threshold: self.nms_threshold,
      },
    }
  }
}
