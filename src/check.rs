// 该文件是 Hushen （护身） 项目的一部分。
// src/check.rs - 部署自检与目录初始化
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

use std::{
  fmt::Write as _,
  fs,
  path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
  config::ServiceConfig,
  input::{CameraCandidate, CameraDriver, CaptureBackend},
  model::{InferenceEngine, ModelSource, ModelSourceError},
  output::{ArtifactStore, StorageError},
};

/// 自检时探测的摄像头序号
pub const CHECKED_CAMERA_INDICES: std::ops::Range<u32> = 0..3;

const WRITE_TEST_FILE: &str = ".hushen_write_test";
const SECRET_MARKERS: [&str; 4] = ["SECRET", "KEY", "TOKEN", "PASSWORD"];

#[derive(Debug, Clone, PartialEq)]
pub struct ModelCheck {
  pub source: Result<ModelSource, ModelSourceError>,
  pub loaded: bool,
  pub classes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraStatus {
  pub candidate: CameraCandidate,
  pub resolution: Option<(u32, u32)>,
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryCheck {
  pub path: PathBuf,
  pub exists: bool,
  pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
  pub model: ModelCheck,
  pub cameras: Vec<CameraStatus>,
  pub directories: Vec<DirectoryCheck>,
  pub environment: Vec<(String, String)>,
}

impl CheckReport {
  /// 模型可用且所有目录可写。摄像头不是必需的
  pub fn is_ready(&self) -> bool {
    self.model.loaded && self.directories.iter().all(|d| d.exists && d.writable)
  }

  pub fn render(&self, verbose: bool) -> String {
    let mark = |ok: bool| if ok { "OK" } else { "FAIL" };
    let mut out = String::new();

    let _ = writeln!(out, "== 模型 ==");
    match &self.model.source {
      Ok(source) => {
        let _ = writeln!(
          out,
          "[{}] {} ({})",
          mark(self.model.loaded),
          source.path().display(),
          match source {
            ModelSource::Configured(_) => "配置",
            ModelSource::Fallback(_) => "默认",
          }
        );
      }
      Err(e) => {
        let _ = writeln!(out, "[FAIL] {}", e);
      }
    }
    if verbose && self.model.loaded {
      let _ = writeln!(out, "     类别数: {}", self.model.classes);
    }

    let _ = writeln!(out, "== 摄像头 ==");
    for camera in &self.cameras {
      match (camera.resolution, &camera.error) {
        (Some((w, h)), _) => {
          let _ = writeln!(out, "[OK] {} {}x{}", camera.candidate, w, h);
        }
        (None, Some(e)) if verbose => {
          let _ = writeln!(out, "[--] {} {}", camera.candidate, e);
        }
        (None, _) => {
          let _ = writeln!(out, "[--] {} 不可用", camera.candidate);
        }
      }
    }

    let _ = writeln!(out, "== 目录 ==");
    for dir in &self.directories {
      let state = match (dir.exists, dir.writable) {
        (false, _) => "不存在",
        (true, false) => "不可写",
        (true, true) => "可写",
      };
      let _ = writeln!(
        out,
        "[{}] {} {}",
        mark(dir.exists && dir.writable),
        dir.path.display(),
        state
      );
    }

    if verbose {
      let _ = writeln!(out, "== 环境变量 ==");
      for (name, value) in &self.environment {
        let _ = writeln!(out, "{}={}", name, value);
      }
    }

    let _ = writeln!(
      out,
      "{}",
      if self.is_ready() {
        "服务可以启动"
      } else {
        "服务未就绪"
      }
    );
    out
  }
}

pub fn check_model(config: &ServiceConfig) -> ModelCheck {
  let source = ModelSource::resolve(&config.model);
  let engine = InferenceEngine::load(&config.model);
  ModelCheck {
    source,
    loaded: engine.is_available(),
    classes: engine.labels().len(),
  }
}

/// 逐个打开摄像头并读取一帧，探测完立即释放
pub fn check_cameras(driver: &dyn CameraDriver, indices: std::ops::Range<u32>) -> Vec<CameraStatus> {
  indices
    .map(|index| {
      let candidate = CameraCandidate::new(index, CaptureBackend::Any);
      let result = driver
        .open(&candidate)
        .and_then(|mut device| device.read_frame());
      match result {
        Ok(frame) => CameraStatus {
          candidate,
          resolution: Some(frame.image.dimensions()),
          error: None,
        },
        Err(e) => {
          debug!("摄像头 {} 探测失败: {}", candidate, e);
          CameraStatus {
            candidate,
            resolution: None,
            error: Some(e.to_string()),
          }
        }
      }
    })
    .collect()
}

/// 检查目录是否存在，并写入一个临时文件确认可写
pub fn check_directory(path: &Path) -> DirectoryCheck {
  let exists = path.is_dir();
  let writable = exists && {
    let marker = path.join(WRITE_TEST_FILE);
    let ok = fs::write(&marker, b"ok").is_ok();
    let _ = fs::remove_file(&marker);
    ok
  };
  DirectoryCheck {
    path: path.to_path_buf(),
    exists,
    writable,
  }
}

/// 筛选 `HUSHEN_` 开头的变量和 `RUST_LOG`，敏感值打码
pub fn collect_environment<I>(vars: I) -> Vec<(String, String)>
where
  I: IntoIterator<Item = (String, String)>,
{
  let mut selected: Vec<(String, String)> = vars
    .into_iter()
    .filter(|(name, _)| name.starts_with("HUSHEN_") || name == "RUST_LOG")
    .map(|(name, value)| {
      let secret = SECRET_MARKERS.iter().any(|m| name.contains(m));
      let value = if secret { mask(&value) } else { value };
      (name, value)
    })
    .collect();
  selected.sort();
  selected
}

fn mask(value: &str) -> String {
  let shown: String = value.chars().take(4).collect();
  if value.chars().count() <= 4 {
    "****".to_string()
  } else {
    format!("{}****", shown)
  }
}

pub fn run_check(config: &ServiceConfig, driver: &dyn CameraDriver) -> CheckReport {
  let store = ArtifactStore::new(&config.media_root);
  let mut directories: Vec<DirectoryCheck> = store
    .required_dirs()
    .iter()
    .map(|dir| check_directory(dir))
    .collect();
  if let Some(parent) = database_dir(&config.database) {
    directories.push(check_directory(&parent));
  }

  CheckReport {
    model: check_model(config),
    cameras: check_cameras(driver, CHECKED_CAMERA_INDICES),
    directories,
    environment: collect_environment(std::env::vars()),
  }
}

fn database_dir(database: &Path) -> Option<PathBuf> {
  database
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .map(Path::to_path_buf)
}

/// 创建产物根目录、上传目录、输出目录和数据库所在目录
pub fn setup(config: &ServiceConfig) -> Result<Vec<PathBuf>, StorageError> {
  let store = ArtifactStore::new(&config.media_root);
  store.ensure_layout()?;
  let mut created = store.required_dirs().to_vec();

  if let Some(parent) = database_dir(&config.database) {
    fs::create_dir_all(&parent).map_err(|source| StorageError::Io {
      path: parent.clone(),
      source,
    })?;
    created.push(parent);
  }
  info!("初始化 {} 个目录", created.len());
  Ok(created)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::NullDriver;

  fn config_in(root: &Path) -> ServiceConfig {
    ServiceConfig {
      media_root: root.join("media"),
      database: root.join("db/jobs.db"),
      ..ServiceConfig::default()
    }
  }

  #[test]
  fn setup_creates_writable_layout() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());

    let created = setup(&config).unwrap();
    assert_eq!(created.len(), 4);
    for dir in &created {
      let check = check_directory(dir);
      assert!(check.exists && check.writable, "{}", dir.display());
      assert!(!dir.join(WRITE_TEST_FILE).exists());
    }
  }

  #[test]
  fn missing_directory_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let check = check_directory(&temp.path().join("absent"));
    assert!(!check.exists && !check.writable);
  }

  #[test]
  fn environment_is_filtered_and_masked() {
    let vars = vec![
      ("HUSHEN_BIND".to_string(), "0.0.0.0:80".to_string()),
      ("HUSHEN_SECRET_KEY".to_string(), "abcdefgh".to_string()),
      ("HUSHEN_API_TOKEN".to_string(), "xy".to_string()),
      ("HOME".to_string(), "/root".to_string()),
      ("RUST_LOG".to_string(), "debug".to_string()),
    ];
    let env = collect_environment(vars);
    assert_eq!(
      env,
      vec![
        ("HUSHEN_API_TOKEN".to_string(), "****".to_string()),
        ("HUSHEN_BIND".to_string(), "0.0.0.0:80".to_string()),
        ("HUSHEN_SECRET_KEY".to_string(), "abcd****".to_string()),
        ("RUST_LOG".to_string(), "debug".to_string()),
      ]
    );
  }

  #[test]
  fn report_without_model_is_not_ready() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config_in(temp.path());
    config.model.fallback_path = temp.path().join("none.onnx");
    setup(&config).unwrap();

    let report = run_check(&config, &NullDriver);
    assert!(!report.model.loaded);
    assert_eq!(report.cameras.len(), 3);
    assert!(report.cameras.iter().all(|c| c.resolution.is_none()));
    assert!(!report.is_ready());
    assert!(report.render(true).contains("服务未就绪"));
  }

  #[test]
  fn foreign_model_scheme_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config_in(temp.path());
    config.model.url = Some(url::Url::parse("rknn:///opt/ppe.rknn").unwrap());

    let model = check_model(&config);
    assert!(model.source.is_err());
    assert!(!model.loaded);
    let report = CheckReport {
      model,
      cameras: Vec::new(),
      directories: Vec::new(),
      environment: Vec::new(),
    };
    assert!(report.render(false).contains("rknn"));
  }
}
