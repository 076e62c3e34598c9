// 该文件是 Hushen （护身） 项目的一部分。
// src/store.rs - 检测任务记录存储
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
  path::Path,
  sync::{Mutex, MutexGuard},
};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::Detection;

/// 任务标识，由存储在创建时原子分配
pub type JobId = i64;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("数据库错误: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("检测结果序列化错误: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("任务不存在: {0}")]
  NotFound(JobId),
  #[error("数据库连接锁已损坏")]
  Poisoned,
}

/// 一条任务记录。`artifact_path` 仅在处理成功后才有值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
  pub id: JobId,
  /// 原图路径，相对产物根目录
  pub source_path: String,
  /// 标注图路径，相对产物根目录
  pub artifact_path: Option<String>,
  pub detections: Option<Vec<Detection>>,
  /// RFC 3339 时间
  pub created_at: String,
}

pub trait JobStore: Send + Sync {
  /// 创建任务并分配标识
  fn create(&self, source_path: &str) -> Result<JobRecord, StoreError>;

  fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

  /// 记录处理结果
  fn complete(
    &self,
    id: JobId,
    artifact_path: &str,
    detections: &[Detection],
  ) -> Result<(), StoreError>;

  /// 删除任务记录，返回记录是否存在
  fn delete(&self, id: JobId) -> Result<bool, StoreError>;

  /// 按创建时间倒序列出所有任务
  fn list_recent(&self) -> Result<Vec<JobRecord>, StoreError>;
}

pub struct SqliteJobStore {
  conn: Mutex<Connection>,
}

impl SqliteJobStore {
  pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(
      r#"
      CREATE TABLE IF NOT EXISTS detection_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_path TEXT NOT NULL,
        artifact_path TEXT,
        detections_json TEXT,
        created_at TEXT NOT NULL
      );
      "#,
    )?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::Poisoned)
  }
}

const SELECT_COLUMNS: &str =
  "SELECT id, source_path, artifact_path, detections_json, created_at FROM detection_jobs";

fn read_row(row: &Row<'_>) -> rusqlite::Result<(JobRecord, Option<String>)> {
  let record = JobRecord {
    id: row.get(0)?,
    source_path: row.get(1)?,
    artifact_path: row.get(2)?,
    detections: None,
    created_at: row.get(4)?,
  };
  Ok((record, row.get(3)?))
}

fn with_detections(
  (mut record, json): (JobRecord, Option<String>),
) -> Result<JobRecord, StoreError> {
  if let Some(json) = json {
    record.detections = Some(serde_json::from_str(&json)?);
  }
  Ok(record)
}

impl JobStore for SqliteJobStore {
  fn create(&self, source_path: &str) -> Result<JobRecord, StoreError> {
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO detection_jobs (source_path, created_at) VALUES (?1, ?2)",
      params![source_path, created_at],
    )?;
    let id = conn.last_insert_rowid();
    debug!("创建任务记录 {}: {}", id, source_path);
    Ok(JobRecord {
      id,
      source_path: source_path.to_string(),
      artifact_path: None,
      detections: None,
      created_at,
    })
  }

  fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
    let row = stmt.query_row(params![id], read_row).optional()?;
    row.map(with_detections).transpose()
  }

  fn complete(
    &self,
    id: JobId,
    artifact_path: &str,
    detections: &[Detection],
  ) -> Result<(), StoreError> {
    let json = serde_json::to_string(detections)?;
    let conn = self.lock()?;
    let updated = conn.execute(
      "UPDATE detection_jobs SET artifact_path = ?1, detections_json = ?2 WHERE id = ?3",
      params![artifact_path, json, id],
    )?;
    if updated == 0 {
      return Err(StoreError::NotFound(id));
    }
    Ok(())
  }

  fn delete(&self, id: JobId) -> Result<bool, StoreError> {
    let conn = self.lock()?;
    let deleted = conn.execute("DELETE FROM detection_jobs WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
  }

  fn list_recent(&self) -> Result<Vec<JobRecord>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC", SELECT_COLUMNS))?;
    let rows = stmt.query_map([], read_row)?;
    let mut records = Vec::new();
    for row in rows {
      records.push(with_detections(row?)?);
    }
    Ok(records)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn helmet() -> Detection {
    Detection {
      class_name: "helmet".to_string(),
      confidence: 0.8,
      bbox: [1.0, 2.0, 3.0, 4.0],
    }
  }

  #[test]
  fn ids_are_unique_and_listing_is_newest_first() {
    let store = SqliteJobStore::open_in_memory().unwrap();
    let a = store.create("uploads/a.png").unwrap();
    let b = store.create("uploads/b.png").unwrap();
    assert_ne!(a.id, b.id);

    let ids: Vec<JobId> = store.list_recent().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
  }

  #[test]
  fn complete_stores_artifact_and_detections() {
    let store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create("uploads/a.png").unwrap();
    assert_eq!(store.get(job.id).unwrap().unwrap().artifact_path, None);

    store
      .complete(job.id, "outputs/1/predict/a.jpg", &[helmet()])
      .unwrap();
    let record = store.get(job.id).unwrap().unwrap();
    assert_eq!(record.artifact_path.as_deref(), Some("outputs/1/predict/a.jpg"));
    assert_eq!(record.detections, Some(vec![helmet()]));
    assert!(chrono::DateTime::parse_from_rfc3339(&record.created_at).is_ok());
  }

  #[test]
  fn delete_and_missing_ids() {
    let store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create("uploads/a.png").unwrap();
    assert!(store.delete(job.id).unwrap());
    assert!(!store.delete(job.id).unwrap());
    assert!(store.get(job.id).unwrap().is_none());
    assert!(matches!(
      store.complete(job.id, "x", &[]),
      Err(StoreError::NotFound(_))
    ));
  }

  #[test]
  fn file_database_persists_across_handles() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jobs.db");
    let id = SqliteJobStore::open(&path)
      .unwrap()
      .create("uploads/a.png")
      .unwrap()
      .id;
    let reopened = SqliteJobStore::open(&path).unwrap();
    assert_eq!(reopened.get(id).unwrap().unwrap().source_path, "uploads/a.png");
  }
}
