// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::transform::CropRegion;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 检测框，像素坐标（左上角 + 尺寸）
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
  pub x: i32,
  pub y: i32,
  pub w: i32,
  pub h: i32,
}

impl BoundingBox {
  pub fn new(
    class_id: usize,
    label: &str,
    confidence: f32,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
  ) -> Self {
    Self {
      class_id,
      label: label.to_string(),
      confidence,
      x,
      y,
      w,
      h,
    }
  }

  pub fn area(&self) -> i64 {
    self.w.max(0) as i64 * self.h.max(0) as i64
  }

  /// 两个框的交并比
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x0 = self.x.max(other.x) as i64;
    let y0 = self.y.max(other.y) as i64;
    let x1 = (self.x as i64 + self.w as i64).min(other.x as i64 + other.w as i64);
    let y1 = (self.y as i64 + self.h as i64).min(other.y as i64 + other.h as i64);

    let intersection = (x1 - x0).max(0) * (y1 - y0).max(0);
    let union = self.area() + other.area() - intersection;

    if union > 0 {
      intersection as f32 / union as f32
    } else {
      0.0
    }
  }
}

/// 检测阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
  /// 目标置信度阈值，低于该值的锚框直接丢弃
  pub box_confidence: f32,
  /// 类别置信度阈值
  pub class_confidence: f32,
  /// NMS IoU 阈值
  pub nms_iou: f32,
}

impl Default for ThresholdConfig {
  fn default() -> Self {
    Self {
      box_confidence: 0.2,
      class_confidence: 0.2,
      nms_iou: 0.6,
    }
  }
}

/// 单次推理结果
#[derive(Debug, Clone)]
pub struct DetectionResult {
  pub bbox_list: Vec<BoundingBox>,
  /// 实际参与推理的原图区域
  pub crop: CropRegion,
  /// 各阶段耗时 [毫秒]
  pub time_pre_process: f64,
  pub time_inference: f64,
  pub time_post_process: f64,
}

impl DetectionResult {
  pub fn is_empty(&self) -> bool {
    self.bbox_list.is_empty()
  }

  pub fn len(&self) -> usize {
    self.bbox_list.len()
  }
}

mod config;
mod decode;
mod engine;

pub use self::config::{EngineBuilder, EngineBuilderError, EngineConfig};
pub use self::decode::{ANCHOR_HEADER_LEN, Scale, collect_candidates, decode_anchor};
pub use self::engine::{DetectionEngine, EngineError, InitError, RuntimeFactory};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_thresholds() {
    let t = ThresholdConfig::default();
    assert_eq!(t.box_confidence, 0.2);
    assert_eq!(t.class_confidence, 0.2);
    assert_eq!(t.nms_iou, 0.6);
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BoundingBox::new(0, "", 0.5, 10, 10, 20, 20);
    let b = BoundingBox::new(0, "", 0.5, 100, 100, 20, 20);
    assert_eq!(a.iou(&a), 1.0);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn degenerate_boxes_have_zero_iou() {
    let a = BoundingBox::new(0, "", 0.5, 10, 10, 0, 0);
    assert_eq!(a.iou(&a), 0.0);
  }
}
