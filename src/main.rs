// 该文件是 Hushen （护身） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{path::Path, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{Level, info, warn};

use hushen::{
  check,
  config::ServiceConfig,
  input::{DEFAULT_CANDIDATES, default_driver, guess_content_type},
  model::InferenceEngine,
  output::{Annotator, ArtifactStore, draw::Draw},
  pipeline::{JobPipeline, Upload},
  server::{AppState, STREAM_STALL_TIMEOUT, Server},
  store::{JobStore, SqliteJobStore},
  stream::{CancelToken, StreamOptions},
};

use args::{Args, Command};

fn build_pipeline(config: &ServiceConfig) -> Result<(Arc<JobPipeline>, Annotator)> {
  let engine = Arc::new(InferenceEngine::load(&config.model));
  if !engine.is_available() {
    warn!("模型未加载，检测请求将被拒绝");
  }

  let store: Arc<dyn JobStore> = Arc::new(
    SqliteJobStore::open(&config.database)
      .with_context(|| format!("无法打开任务数据库: {}", config.database.display()))?,
  );
  let artifacts = ArtifactStore::new(&config.media_root);
  artifacts
    .ensure_layout()
    .context("无法创建产物目录")?;

  let draw = Draw::from_font_option(config.font.as_deref()).context("无法加载标签字体")?;
  let annotator = Annotator::ppe(draw);
  let pipeline = JobPipeline::new(engine, store, artifacts, annotator.clone())
    .with_media_url(config.media_url.clone());
  Ok((Arc::new(pipeline), annotator))
}

fn serve(config: ServiceConfig) -> Result<()> {
  let (pipeline, annotator) = build_pipeline(&config)?;
  let shutdown = CancelToken::new();

  let state = AppState {
    pipeline,
    driver: default_driver(),
    candidates: DEFAULT_CANDIDATES.to_vec(),
    annotator,
    stream_options: StreamOptions {
      jpeg_quality: config.jpeg_quality,
      ..StreamOptions::default()
    },
    stall_timeout: STREAM_STALL_TIMEOUT,
    shutdown: shutdown.clone(),
  };

  let handle = Server::new(state, config.bind.clone()).spawn()?;
  info!("服务已启动: http://{}", handle.addr());

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    shutdown.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  handle.wait()?;
  info!("服务已停止");
  Ok(())
}

fn detect(config: ServiceConfig, image: &Path) -> Result<()> {
  let (pipeline, _) = build_pipeline(&config)?;
  let bytes = std::fs::read(image).with_context(|| format!("无法读取图片: {}", image.display()))?;
  let file_name = image
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let upload = Upload::new(file_name, guess_content_type(image), bytes);

  let outcome = pipeline.submit(upload)?;
  println!("{}", serde_json::to_string_pretty(&outcome)?);
  Ok(())
}

fn run_check(config: ServiceConfig, verbose: bool) -> Result<()> {
  let driver = default_driver();
  let report = check::run_check(&config, driver.as_ref());
  print!("{}", report.render(verbose));
  if report.is_ready() {
    Ok(())
  } else {
    Err(anyhow!("服务未就绪"))
  }
}

fn setup(config: ServiceConfig) -> Result<()> {
  for dir in check::setup(&config)? {
    println!("已创建: {}", dir.display());
  }
  Ok(())
}

fn main() -> Result<()> {
  let args = Args::parse();

  tracing_subscriber::fmt()
    .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
    .init();

  let config = args.service.into_config();
  match args.command {
    Command::Serve => serve(config),
    Command::Detect { image } => detect(config, &image),
    Command::Check => run_check(config, args.verbose),
    Command::Setup => setup(config),
  }
}
