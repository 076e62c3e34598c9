// 该文件是 Hushen （护身） 项目的一部分。
// src/pipeline.rs - 静态图片检测任务
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

//! 一张图片的处理流程：
//!
//! ```text
//! Accepted -> Validated -> Created -> Prepared -> Inferred -> Rendered -> Persisted
//!                              \__________________ 任一步失败 __________/
//!                                                   |
//!                                               RolledBack
//! ```
//!
//! 校验失败时还没有分配任务标识，直接返回。任务创建之后的任何失败都会删除
//! 输出目录、任务记录和上传的原图，然后把错误交给调用方。

use std::{fmt, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{MAX_UPLOAD_BYTES, media_locator},
  input::ImageSource,
  model::{Detection, EngineError, InferenceEngine, MODEL_NOT_LOADED},
  output::{Annotator, ArtifactStore, StorageError, file_stem},
  store::{JobId, JobRecord, JobStore, StoreError},
};

/// 一次上传
#[derive(Debug, Clone, Default)]
pub struct Upload {
  pub file_name: String,
  /// 客户端声明的 MIME 类型
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(file_name: impl Into<String>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
    Self {
      file_name: file_name.into(),
      content_type: content_type.map(str::to_string),
      bytes,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
  #[error("No image provided")]
  Missing,
  #[error("File must be an image (got {0})")]
  NotImage(String),
  #[error("File size must be less than 10MB (got {0} bytes)")]
  TooLarge(usize),
}

pub fn validate(upload: &Upload) -> Result<(), ValidationError> {
  if upload.bytes.is_empty() {
    return Err(ValidationError::Missing);
  }
  let content_type = upload.content_type.as_deref().unwrap_or("").trim();
  if !content_type.to_ascii_lowercase().starts_with("image/") {
    let shown = if content_type.is_empty() {
      "unknown"
    } else {
      content_type
    };
    return Err(ValidationError::NotImage(shown.to_string()));
  }
  if upload.bytes.len() > MAX_UPLOAD_BYTES {
    return Err(ValidationError::TooLarge(upload.bytes.len()));
  }
  Ok(())
}

/// 任务生命周期中的阶段，错误中记录失败发生前已到达的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
  Accepted,
  Validated,
  Created,
  Prepared,
  Inferred,
  Rendered,
  Persisted,
  Deleting,
}

impl fmt::Display for JobStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      JobStage::Accepted => "accepted",
      JobStage::Validated => "validated",
      JobStage::Created => "created",
      JobStage::Prepared => "prepared",
      JobStage::Inferred => "inferred",
      JobStage::Rendered => "rendered",
      JobStage::Persisted => "persisted",
      JobStage::Deleting => "deleting",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum JobError {
  #[error("{0}")]
  Validation(#[from] ValidationError),
  #[error("{}", MODEL_NOT_LOADED)]
  EngineUnavailable,
  #[error("推理失败 ({stage}): {message}")]
  Inference { stage: JobStage, message: String },
  #[error("存储失败 ({stage}): {source}")]
  Storage {
    stage: JobStage,
    #[source]
    source: StorageError,
  },
  #[error("任务记录失败 ({stage}): {source}")]
  Store {
    stage: JobStage,
    #[source]
    source: StoreError,
  },
  #[error("任务不存在: {0}")]
  NotFound(JobId),
}

impl JobError {
  /// 失败时所处的阶段
  pub fn stage(&self) -> JobStage {
    match self {
      JobError::Validation(_) | JobError::EngineUnavailable => JobStage::Accepted,
      JobError::Inference { stage, .. }
      | JobError::Storage { stage, .. }
      | JobError::Store { stage, .. } => *stage,
      JobError::NotFound(_) => JobStage::Deleting,
    }
  }

  fn storage(stage: JobStage) -> impl FnOnce(StorageError) -> JobError {
    move |source| JobError::Storage { stage, source }
  }

  fn store(stage: JobStage) -> impl FnOnce(StoreError) -> JobError {
    move |source| JobError::Store { stage, source }
  }
}

/// 成功处理后返回给调用方的结果
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
  pub job_id: JobId,
  pub source_locator: String,
  pub artifact_locator: String,
  pub detections: Vec<Detection>,
}

/// 列表中的一条任务，附带对外地址
#[derive(Debug, Clone, Serialize)]
pub struct JobListing {
  #[serde(flatten)]
  pub record: JobRecord,
  pub source_locator: String,
  pub artifact_locator: Option<String>,
}

pub struct JobPipeline {
  engine: Arc<InferenceEngine>,
  store: Arc<dyn JobStore>,
  artifacts: ArtifactStore,
  annotator: Annotator,
  media_url: String,
}

impl JobPipeline {
  pub fn new(
    engine: Arc<InferenceEngine>,
    store: Arc<dyn JobStore>,
    artifacts: ArtifactStore,
    annotator: Annotator,
  ) -> Self {
    Self {
      engine,
      store,
      artifacts,
      annotator,
      media_url: "/media/".to_string(),
    }
  }

  pub fn with_media_url(mut self, media_url: impl Into<String>) -> Self {
    self.media_url = media_url.into();
    self
  }

  pub fn artifacts(&self) -> &ArtifactStore {
    &self.artifacts
  }

  pub fn engine(&self) -> &Arc<InferenceEngine> {
    &self.engine
  }

  fn locator(&self, relative: &str) -> String {
    media_locator(&self.media_url, relative)
  }

  /// 处理一张上传的图片
  pub fn submit(&self, upload: Upload) -> Result<JobOutcome, JobError> {
    if !self.engine.is_available() {
      warn!("模型未加载，拒绝处理 {}", upload.file_name);
      return Err(JobError::EngineUnavailable);
    }

    if let Err(e) = validate(&upload) {
      info!("上传校验失败 ({}): {}", upload.file_name, e);
      return Err(e.into());
    }
    debug!("[{}] {} ({} 字节)", JobStage::Validated, upload.file_name, upload.bytes.len());

    let source_path = self
      .artifacts
      .store_source(&upload.file_name, &upload.bytes)
      .map_err(JobError::storage(JobStage::Validated))?;

    let job = match self.store.create(&source_path) {
      Ok(job) => job,
      Err(e) => {
        error!("创建任务记录失败: {}", e);
        if let Err(e) = self.artifacts.remove_source(&source_path) {
          warn!("清理原图失败 {}: {}", source_path, e);
        }
        return Err(JobError::store(JobStage::Validated)(e));
      }
    };
    info!("[{}] 任务 {}: {}", JobStage::Created, job.id, source_path);

    match self.process(&job) {
      Ok(outcome) => {
        info!(
          "[{}] 任务 {} 完成，{} 个检测结果",
          JobStage::Persisted,
          job.id,
          outcome.detections.len()
        );
        Ok(outcome)
      }
      Err(e) => {
        error!("任务 {} 在 {} 之后失败: {}", job.id, e.stage(), e);
        self.roll_back(&job);
        Err(e)
      }
    }
  }

  fn process(&self, job: &JobRecord) -> Result<JobOutcome, JobError> {
    let output_dir = self
      .artifacts
      .prepare(job.id)
      .map_err(JobError::storage(JobStage::Created))?;
    debug!("[{}] 任务 {}: {}", JobStage::Prepared, job.id, output_dir.display());

    let image = self
      .artifacts
      .resolve(&job.source_path)
      .ok_or_else(|| JobError::Inference {
        stage: JobStage::Prepared,
        message: format!("原图路径无效: {}", job.source_path),
      })
      .and_then(|path| {
        ImageSource::open(&path).map_err(|e| JobError::Inference {
          stage: JobStage::Prepared,
          message: e.to_string(),
        })
      })?
      .into_image();

    let detections = self.engine.infer(&image).map_err(|e| match e {
      EngineError::Unavailable => JobError::EngineUnavailable,
      EngineError::Inference(message) => JobError::Inference {
        stage: JobStage::Prepared,
        message,
      },
    })?;
    debug!("[{}] 任务 {}: {} 个检测结果", JobStage::Inferred, job.id, detections.len());

    let annotated = self.annotator.annotate(&image, &detections);
    debug!("[{}] 任务 {}", JobStage::Rendered, job.id);

    let artifact_path = self
      .artifacts
      .persist(&output_dir, &file_stem(&job.source_path), &annotated)
      .map_err(JobError::storage(JobStage::Rendered))?;
    self
      .store
      .complete(job.id, &artifact_path, &detections)
      .map_err(JobError::store(JobStage::Rendered))?;

    Ok(JobOutcome {
      job_id: job.id,
      source_locator: self.locator(&job.source_path),
      artifact_locator: self.locator(&artifact_path),
      detections,
    })
  }

  /// 删除失败任务留下的全部状态，清理中的错误只记录日志
  fn roll_back(&self, job: &JobRecord) {
    if let Err(e) = self.artifacts.discard(job.id) {
      error!("回滚任务 {} 时删除输出目录失败: {}", job.id, e);
    }
    if let Err(e) = self.store.delete(job.id) {
      error!("回滚任务 {} 时删除记录失败: {}", job.id, e);
    }
    if let Err(e) = self.artifacts.remove_source(&job.source_path) {
      error!("回滚任务 {} 时删除原图失败: {}", job.id, e);
    }
    warn!("任务 {} 已回滚", job.id);
  }

  /// 按时间倒序列出任务。原图或标注图已丢失的任务会被顺带删除
  pub fn list_jobs(&self) -> Result<Vec<JobListing>, JobError> {
    let records = self
      .store
      .list_recent()
      .map_err(JobError::store(JobStage::Persisted))?;

    let mut listings = Vec::with_capacity(records.len());
    for record in records {
      let artifact_missing = record
        .artifact_path
        .as_deref()
        .is_some_and(|path| !self.artifacts.exists(path));
      if !self.artifacts.exists(&record.source_path) || artifact_missing {
        warn!("任务 {} 的文件已丢失，删除记录", record.id);
        if let Err(e) = self.store.delete(record.id) {
          error!("删除失效任务 {} 失败: {}", record.id, e);
        }
        if let Err(e) = self.artifacts.discard(record.id) {
          error!("删除失效任务 {} 的输出目录失败: {}", record.id, e);
        }
        continue;
      }

      listings.push(JobListing {
        source_locator: self.locator(&record.source_path),
        artifact_locator: record.artifact_path.as_deref().map(|p| self.locator(p)),
        record,
      });
    }
    Ok(listings)
  }

  /// 删除任务：记录、原图和整个输出目录
  pub fn delete_job(&self, id: JobId) -> Result<(), JobError> {
    let record = self
      .store
      .get(id)
      .map_err(JobError::store(JobStage::Deleting))?
      .ok_or(JobError::NotFound(id))?;

    self
      .artifacts
      .remove_source(&record.source_path)
      .map_err(JobError::storage(JobStage::Deleting))?;
    self
      .artifacts
      .discard(id)
      .map_err(JobError::storage(JobStage::Deleting))?;
    self
      .store
      .delete(id)
      .map_err(JobError::store(JobStage::Deleting))?;
    info!("删除任务 {}", id);
    Ok(())
  }
}
