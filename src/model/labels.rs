// 该文件是 Hushen （护身） 项目的一部分。
// src/model/labels.rs - 类别名称表
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

use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;
use thiserror::Error;

/// COCO 数据集类别名称，默认模型使用
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("标签索引无效: {0}")]
  InvalidIndex(String),
}

/// 类别索引到名称的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

// 两种布局：`["helmet", "vest"]` 或 ultralytics 的 `{"0": "helmet", "1": "vest"}`
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelsFile {
  List(Vec<String>),
  Map(BTreeMap<String, String>),
}

impl Labels {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES)
  }

  pub fn from_json(text: &str) -> Result<Self, LabelsError> {
    match serde_json::from_str(text)? {
      LabelsFile::List(names) => Ok(Self { names }),
      LabelsFile::Map(map) => {
        let mut indexed = Vec::with_capacity(map.len());
        for (key, name) in map {
          let idx: usize = key
            .trim()
            .parse()
            .map_err(|_| LabelsError::InvalidIndex(key.clone()))?;
          indexed.push((idx, name));
        }
        indexed.sort_by_key(|(idx, _)| *idx);

        let len = indexed.last().map(|(idx, _)| idx + 1).unwrap_or(0);
        let mut names = vec![UNKNOWN_LABEL.to_string(); len];
        for (idx, name) in indexed {
          names[idx] = name;
        }
        Ok(Self { names })
      }
    }
  }

  pub fn from_file(path: &Path) -> Result<Self, LabelsError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_json(&text)
  }

  pub fn name(&self, class_id: u32) -> &str {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_list_layout() {
    let labels = Labels::from_json(r#"["helmet", "vest", "person"]"#).unwrap();
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(1), "vest");
  }

  #[test]
  fn parses_ultralytics_map_layout_with_gaps() {
    let labels = Labels::from_json(r#"{"0": "helmet", "2": "no-vest"}"#).unwrap();
    assert_eq!(labels.names(), &["helmet", "unknown", "no-vest"]);
  }

  #[test]
  fn rejects_non_numeric_keys() {
    let err = Labels::from_json(r#"{"a": "helmet"}"#).unwrap_err();
    assert!(matches!(err, LabelsError::InvalidIndex(_)));
  }

  #[test]
  fn out_of_range_index_is_unknown() {
    assert_eq!(Labels::coco().name(0), "person");
    assert_eq!(Labels::coco().name(500), "unknown");
  }
}
