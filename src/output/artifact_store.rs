// 该文件是 Hushen （护身） 项目的一部分。
// src/output/artifact_store.rs - 任务产物目录管理
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

//! 产物根目录布局：
//!
//! ```text
//! <root>/uploads/<原图文件名>
//! <root>/outputs/<job_id>/predict/<原图文件名主干>.jpg
//! ```
//!
//! 对外只返回相对 `<root>` 的路径，分隔符统一为 `/`。

use std::{
  fs::{self, OpenOptions},
  io::{self, Write},
  path::{Component, Path, PathBuf},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{OUTPUTS_DIR, UPLOADS_DIR},
  store::JobId,
};

/// 任务输出目录下保存标注图的子目录
pub const PREDICT_DIR: &str = "predict";
const ARTIFACT_EXTENSION: &str = "jpg";
const DEFAULT_UPLOAD_NAME: &str = "upload";

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("I/O 错误 ({path}): {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("路径不在产物根目录下: {0}")]
  OutsideRoot(PathBuf),
}

impl StorageError {
  fn io(path: &Path, source: io::Error) -> Self {
    StorageError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
  root: PathBuf,
}

impl ArtifactStore {
  pub fn new<P: Into<PathBuf>>(root: P) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 根目录、上传目录和输出目录
  pub fn required_dirs(&self) -> [PathBuf; 3] {
    [
      self.root.clone(),
      self.root.join(UPLOADS_DIR),
      self.root.join(OUTPUTS_DIR),
    ]
  }

  pub fn ensure_layout(&self) -> Result<(), StorageError> {
    for dir in self.required_dirs() {
      fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
      debug!("目录就绪: {}", dir.display());
    }
    Ok(())
  }

  /// 由任务标识确定的输出目录
  pub fn output_dir(&self, job_id: JobId) -> PathBuf {
    self.root.join(OUTPUTS_DIR).join(job_id.to_string())
  }

  /// 准备一个空的输出目录，已有目录会先被完整删除
  pub fn prepare(&self, job_id: JobId) -> Result<PathBuf, StorageError> {
    let dir = self.output_dir(job_id);
    if dir.exists() {
      warn!("输出目录已存在，清理旧内容: {}", dir.display());
      remove_tree(&dir).map_err(|e| StorageError::io(&dir, e))?;
    }
    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
    info!("创建输出目录: {}", dir.display());
    Ok(dir)
  }

  /// 保存标注后的图像，返回相对根目录的路径
  pub fn persist(
    &self,
    output_dir: &Path,
    file_stem: &str,
    image: &RgbImage,
  ) -> Result<String, StorageError> {
    let predict_dir = output_dir.join(PREDICT_DIR);
    fs::create_dir_all(&predict_dir).map_err(|e| StorageError::io(&predict_dir, e))?;

    let stem = sanitize_file_name(file_stem);
    let path = predict_dir.join(format!("{}.{}", stem, ARTIFACT_EXTENSION));
    image.save(&path)?;
    info!("保存标注图像: {}", path.display());

    self.relative(&path)
  }

  /// 删除任务的整个输出目录，目录不存在时视为成功
  pub fn discard(&self, job_id: JobId) -> Result<(), StorageError> {
    let dir = self.output_dir(job_id);
    if !dir.exists() {
      return Ok(());
    }
    remove_tree(&dir).map_err(|e| StorageError::io(&dir, e))?;
    info!("删除输出目录: {}", dir.display());
    Ok(())
  }

  /// 保存上传的原图，重名时追加数字后缀
  pub fn store_source(&self, file_name: &str, bytes: &[u8]) -> Result<String, StorageError> {
    let dir = self.root.join(UPLOADS_DIR);
    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let name = sanitize_file_name(file_name);
    let (stem, extension) = split_extension(&name);

    for attempt in 0u32.. {
      let candidate = if attempt == 0 {
        name.clone()
      } else {
        match extension {
          Some(ext) => format!("{}_{}.{}", stem, attempt, ext),
          None => format!("{}_{}", stem, attempt),
        }
      };
      let path = dir.join(&candidate);
      match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
          let written = file.write_all(bytes).and_then(|_| file.sync_all());
          if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(StorageError::io(&path, e));
          }
          debug!("保存原图: {}", path.display());
          return self.relative(&path);
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(StorageError::io(&path, e)),
      }
    }
    unreachable!("上传文件名后缀耗尽")
  }

  /// 删除上传的原图，文件不存在时视为成功
  pub fn remove_source(&self, relative: &str) -> Result<(), StorageError> {
    let path = self
      .resolve(relative)
      .ok_or_else(|| StorageError::OutsideRoot(PathBuf::from(relative)))?;
    match fs::remove_file(&path) {
      Ok(()) => {
        info!("删除原图: {}", path.display());
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StorageError::io(&path, e)),
    }
  }

  /// 把相对路径解析为绝对路径，拒绝跳出根目录的路径
  pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches('/'));
    let safe = relative
      .components()
      .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || relative.as_os_str().is_empty() {
      return None;
    }
    Some(self.root.join(relative))
  }

  pub fn exists(&self, relative: &str) -> bool {
    self.resolve(relative).map(|p| p.is_file()).unwrap_or(false)
  }

  fn relative(&self, path: &Path) -> Result<String, StorageError> {
    let relative = path
      .strip_prefix(&self.root)
      .map_err(|_| StorageError::OutsideRoot(path.to_path_buf()))?;
    let parts: Vec<String> = relative
      .components()
      .map(|c| c.as_os_str().to_string_lossy().into_owned())
      .collect();
    Ok(parts.join("/"))
  }
}

/// 深度优先删除目录树：先删除所有文件，再由内向外删除目录
pub fn remove_tree(root: &Path) -> io::Result<()> {
  let mut files = Vec::new();
  let mut dirs = Vec::new();
  collect_tree(root, &mut files, &mut dirs)?;

  for file in &files {
    fs::remove_file(file)?;
  }
  // collect_tree 按后序收集目录，最内层在前
  for dir in &dirs {
    fs::remove_dir(dir)?;
  }
  Ok(())
}

fn collect_tree(dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> io::Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    if entry.file_type()?.is_dir() {
      collect_tree(&path, files, dirs)?;
    } else {
      files.push(path);
    }
  }
  dirs.push(dir.to_path_buf());
  Ok(())
}

fn sanitize_file_name(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
        c
      } else {
        '_'
      }
    })
    .collect();
  let cleaned = cleaned.trim_start_matches('.');
  if cleaned.is_empty() {
    DEFAULT_UPLOAD_NAME.to_string()
  } else {
    cleaned.to_string()
  }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
  match name.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
    _ => (name, None),
  }
}

/// 文件名主干，用作标注图的文件名
pub fn file_stem(relative: &str) -> String {
  let name = relative.rsplit('/').next().unwrap_or(relative);
  split_extension(name).0.to_string()
}
