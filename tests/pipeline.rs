// 该文件是 Hushen （护身） 项目的一部分。
// tests/pipeline.rs - 静态图片任务集成测试
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

mod common;

use std::{fs, path::Path, sync::Arc, thread};

use common::{ScriptedModel, engine_with, item, png_bytes};
use hushen::{
  model::InferenceEngine,
  output::{Annotator, ArtifactStore},
  pipeline::{JobError, JobPipeline, Upload, ValidationError},
  store::{JobStore, SqliteJobStore},
};

struct Fixture {
  _temp: tempfile::TempDir,
  root: std::path::PathBuf,
  store: Arc<SqliteJobStore>,
  pipeline: JobPipeline,
}

fn fixture(engine: Arc<InferenceEngine>) -> Fixture {
  let temp = tempfile::tempdir().unwrap();
  let root = temp.path().join("media");
  let artifacts = ArtifactStore::new(&root);
  artifacts.ensure_layout().unwrap();
  let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
  let pipeline = JobPipeline::new(engine, store.clone(), artifacts, Annotator::default());
  Fixture {
    _temp: temp,
    root,
    store,
    pipeline,
  }
}

fn png_upload(name: &str) -> Upload {
  Upload::new(name, Some("image/png"), png_bytes(64, 48))
}

fn entries(dir: &Path) -> usize {
  fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn successful_job_persists_artifact_and_detections() {
  let model = ScriptedModel::always(vec![
    item(0, 0.9, [4.0, 4.0, 30.0, 30.0]),
    item(1, 0.6, [20.0, 10.0, 60.0, 40.0]),
  ]);
  let fx = fixture(engine_with(model));

  let outcome = fx.pipeline.submit(png_upload("site.png")).unwrap();
  assert_eq!(outcome.detections.len(), 2);
  assert_eq!(outcome.detections[0].class_name, "helmet");
  assert_eq!(outcome.detections[1].class_name, "vest");
  assert_eq!(outcome.source_locator, "/media/uploads/site.png");
  assert_eq!(
    outcome.artifact_locator,
    format!("/media/outputs/{}/predict/site.jpg", outcome.job_id)
  );

  let record = fx.store.get(outcome.job_id).unwrap().unwrap();
  let artifact = fx.root.join(record.artifact_path.as_deref().unwrap());
  assert!(artifact.is_file());
  assert_eq!(record.detections.as_ref().map(Vec::len), Some(2));

  let annotated = image::open(&artifact).unwrap();
  assert_eq!((annotated.width(), annotated.height()), (64, 48));
}

#[test]
fn empty_detections_still_produce_artifact() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  let outcome = fx.pipeline.submit(png_upload("empty.png")).unwrap();
  assert!(outcome.detections.is_empty());
  let record = fx.store.get(outcome.job_id).unwrap().unwrap();
  assert!(fx.root.join(record.artifact_path.unwrap()).is_file());
}

#[test]
fn validation_failure_creates_no_job_and_no_directory() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  let cases = [
    (Upload::new("a.txt", Some("text/plain"), b"hello".to_vec()), "not image"),
    (Upload::new("a.png", Some("image/png"), Vec::new()), "missing"),
    (
      Upload::new("a.png", Some("image/png"), vec![0u8; 10 * 1024 * 1024 + 1]),
      "too large",
    ),
  ];
  for (upload, case) in cases {
    let err = fx.pipeline.submit(upload).unwrap_err();
    assert!(matches!(err, JobError::Validation(_)), "{}", case);
  }

  let err = fx
    .pipeline
    .submit(Upload::new("a.txt", Some("text/plain"), b"x".to_vec()))
    .unwrap_err();
  assert!(matches!(
    err,
    JobError::Validation(ValidationError::NotImage(_))
  ));

  assert!(fx.store.list_recent().unwrap().is_empty());
  assert_eq!(entries(&fx.root.join("outputs")), 0);
  assert_eq!(entries(&fx.root.join("uploads")), 0);
}

#[test]
fn inference_failure_rolls_back_everything() {
  let model = ScriptedModel::default().then(Err("tensor shape mismatch"));
  let fx = fixture(engine_with(model));

  let err = fx.pipeline.submit(png_upload("bad.png")).unwrap_err();
  assert!(matches!(err, JobError::Inference { .. }), "{}", err);

  assert!(fx.store.list_recent().unwrap().is_empty());
  assert_eq!(entries(&fx.root.join("outputs")), 0);
  assert_eq!(entries(&fx.root.join("uploads")), 0);
}

#[test]
fn undecodable_image_rolls_back() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  let upload = Upload::new("fake.png", Some("image/png"), b"definitely not png".to_vec());

  let err = fx.pipeline.submit(upload).unwrap_err();
  assert!(matches!(err, JobError::Inference { .. }));
  assert!(fx.store.list_recent().unwrap().is_empty());
  assert_eq!(entries(&fx.root.join("outputs")), 0);
  assert_eq!(entries(&fx.root.join("uploads")), 0);
}

#[test]
fn storage_failure_rolls_back_record_and_source() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  // outputs 被一个普通文件占据，无法创建任务输出目录
  fs::remove_dir(fx.root.join("outputs")).unwrap();
  fs::write(fx.root.join("outputs"), b"not a directory").unwrap();

  let err = fx.pipeline.submit(png_upload("a.png")).unwrap_err();
  assert!(matches!(err, JobError::Storage { .. }), "{}", err);
  assert!(fx.store.list_recent().unwrap().is_empty());
  assert_eq!(entries(&fx.root.join("uploads")), 0);
  assert!(fx.root.join("outputs").is_file());
}

#[test]
fn unavailable_engine_short_circuits_before_any_state() {
  let fx = fixture(Arc::new(InferenceEngine::unavailable()));
  let err = fx.pipeline.submit(png_upload("a.png")).unwrap_err();
  assert!(matches!(err, JobError::EngineUnavailable));
  assert_eq!(err.to_string(), hushen::model::MODEL_NOT_LOADED);
  assert!(fx.store.list_recent().unwrap().is_empty());
  assert_eq!(entries(&fx.root.join("uploads")), 0);
}

#[test]
fn listing_prunes_jobs_whose_source_vanished() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  let kept = fx.pipeline.submit(png_upload("kept.png")).unwrap();
  let lost = fx.pipeline.submit(png_upload("lost.png")).unwrap();

  fs::remove_file(fx.root.join("uploads/lost.png")).unwrap();

  let listed = fx.pipeline.list_jobs().unwrap();
  let ids: Vec<i64> = listed.iter().map(|l| l.record.id).collect();
  assert_eq!(ids, vec![kept.job_id]);
  assert!(fx.store.get(lost.job_id).unwrap().is_none());
  assert!(!fx.root.join(format!("outputs/{}", lost.job_id)).exists());
  assert_eq!(
    listed[0].artifact_locator.as_deref(),
    Some(kept.artifact_locator.as_str())
  );
}

#[test]
fn listing_prunes_jobs_whose_artifact_vanished() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  let kept = fx.pipeline.submit(png_upload("kept.png")).unwrap();
  let lost = fx.pipeline.submit(png_upload("lost.png")).unwrap();

  let artifact = fx
    .root
    .join(format!("outputs/{}/predict/lost.jpg", lost.job_id));
  fs::remove_file(&artifact).unwrap();
  assert!(fx.root.join("uploads/lost.png").exists());

  let listed = fx.pipeline.list_jobs().unwrap();
  let ids: Vec<i64> = listed.iter().map(|l| l.record.id).collect();
  assert_eq!(ids, vec![kept.job_id]);
  assert!(fx.store.get(lost.job_id).unwrap().is_none());
  assert!(!fx.root.join(format!("outputs/{}", lost.job_id)).exists());
  assert!(fx.root.join(format!("outputs/{}", kept.job_id)).is_dir());
}

#[test]
fn delete_job_reclaims_source_and_output_tree() {
  let fx = fixture(engine_with(ScriptedModel::default()));
  let outcome = fx.pipeline.submit(png_upload("a.png")).unwrap();
  let output_dir = fx.root.join(format!("outputs/{}", outcome.job_id));
  assert!(output_dir.is_dir());

  fx.pipeline.delete_job(outcome.job_id).unwrap();
  assert!(!output_dir.exists());
  assert!(!fx.root.join("uploads/a.png").exists());
  assert!(fx.store.get(outcome.job_id).unwrap().is_none());

  assert!(matches!(
    fx.pipeline.delete_job(outcome.job_id),
    Err(JobError::NotFound(_))
  ));
}

#[test]
fn concurrent_jobs_get_distinct_identities() {
  let fx = fixture(engine_with(ScriptedModel::always(vec![item(
    2,
    0.8,
    [1.0, 1.0, 10.0, 10.0],
  )])));
  let pipeline = Arc::new(fx.pipeline);

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let pipeline = pipeline.clone();
      thread::spawn(move || pipeline.submit(png_upload("same.png")).unwrap())
    })
    .collect();
  let mut ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap().job_id).collect();
  ids.sort();
  ids.dedup();
  assert_eq!(ids.len(), 4);
  assert_eq!(entries(&fx.root.join("uploads")), 4);
  assert_eq!(entries(&fx.root.join("outputs")), 4);
}
