// 该文件是 Hushen （护身） 项目的一部分。
// src/output/policy.rs - 标注文本策略
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

/// 由类别名称和置信度生成显示文本，必须是无副作用的纯函数
pub trait AnnotationPolicy: Send + Sync {
  fn display_label(&self, class_name: &str, confidence: f32) -> String;
}

impl<F> AnnotationPolicy for F
where
  F: Fn(&str, f32) -> String + Send + Sync,
{
  fn display_label(&self, class_name: &str, confidence: f32) -> String {
    self(class_name, confidence)
  }
}

/// 原样显示 `类别 置信度`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPolicy;

impl AnnotationPolicy for PlainPolicy {
  fn display_label(&self, class_name: &str, confidence: f32) -> String {
    format!("{} {:.2}", class_name, round2(confidence))
  }
}

/// 安全帽检测策略：置信度低于阈值的 `helmet` 显示为 `no helmet`
#[derive(Debug, Clone, Copy)]
pub struct PpePolicy {
  pub helmet_threshold: f32,
}

pub const PPE_HELMET_THRESHOLD: f32 = 0.7;

impl Default for PpePolicy {
  fn default() -> Self {
    Self {
      helmet_threshold: PPE_HELMET_THRESHOLD,
    }
  }
}

impl AnnotationPolicy for PpePolicy {
  fn display_label(&self, class_name: &str, confidence: f32) -> String {
    let confidence = round2(confidence);
    let name = if class_name == "helmet" && confidence < self.helmet_threshold {
      "no helmet"
    } else {
      class_name
    };
    format!("{} {:.2}", name, confidence)
  }
}

// 先保留两位小数再比较阈值
fn round2(value: f32) -> f32 {
  (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn low_confidence_helmet_is_relabelled() {
    let policy = PpePolicy::default();
    assert_eq!(policy.display_label("helmet", 0.42), "no helmet 0.42");
    assert_eq!(policy.display_label("helmet", 0.91), "helmet 0.91");
  }

  #[test]
  fn threshold_compares_rounded_confidence() {
    let policy = PpePolicy::default();
    // 0.696 显示为 0.70，不再低于阈值
    assert_eq!(policy.display_label("helmet", 0.696), "helmet 0.70");
  }

  #[test]
  fn other_classes_are_untouched() {
    let policy = PpePolicy::default();
    assert_eq!(policy.display_label("vest", 0.1), "vest 0.10");
  }

  #[test]
  fn closures_are_policies() {
    let policy = |name: &str, _c: f32| name.to_uppercase();
    assert_eq!(policy.display_label("vest", 0.5), "VEST");
    assert_eq!(PlainPolicy.display_label("helmet", 0.5), "helmet 0.50");
  }
}
