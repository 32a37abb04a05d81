// 该文件是 Beifeng （北风） 项目的一部分。
// src/nms.rs - 非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::model::BoundingBox;

/// 重复框抑制
pub trait Suppress {
  /// `candidates` 可被重排，返回保留下来的框
  fn suppress(&self, candidates: &mut [BoundingBox], iou_threshold: f32) -> Vec<BoundingBox>;
}

/// 贪心 NMS：按置信度降序，剔除与已保留框 IoU 超过阈值的框
#[derive(Debug, Clone, Copy)]
pub struct GreedyNms {
  class_aware: bool,
}

impl Default for GreedyNms {
  fn default() -> Self {
    Self { class_aware: true }
  }
}

impl GreedyNms {
  /// 为假时不同类别的框之间也会互相抑制
  pub fn class_aware(mut self, class_aware: bool) -> Self {
    self.class_aware = class_aware;
    self
  }
}

impl Suppress for GreedyNms {
  fn suppress(&self, candidates: &mut [BoundingBox], iou_threshold: f32) -> Vec<BoundingBox> {
    // 按置信度降序排序
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut merged = vec![false; candidates.len()];
    let mut result = Vec::new();

    for i in 0..candidates.len() {
      if merged[i] {
        continue;
      }
      let best = &candidates[i];
      result.push(best.clone());

      for j in (i + 1)..candidates.len() {
        if merged[j] || (self.class_aware && candidates[j].class_id != best.class_id) {
          continue;
        }
        if best.iou(&candidates[j]) > iou_threshold {
          merged[j] = true;
        }
      }
    }

    result
  }
}
