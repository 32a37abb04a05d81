// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/decode.rs - 锚框解码与候选框收集
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::warn;

use crate::model::{BoundingBox, ThresholdConfig};

/// 每个锚框的头部元素: x, y, w, h, 目标置信度
pub const ANCHOR_HEADER_LEN: usize = 5;
const OBJECTNESS_OFFSET: usize = 4;

/// 模型输入空间到裁剪区域空间的缩放比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
  pub x: f32,
  pub y: f32,
}

impl Scale {
  pub fn from_crop(crop_w: i32, crop_h: i32, input_w: usize, input_h: usize) -> Self {
    Self {
      x: crop_w as f32 / input_w as f32,
      y: crop_h as f32 / input_h as f32,
    }
  }
}

/// 解码单个锚框：`[cx, cy, w, h, objectness, class_0 .. class_{C-1}]`
///
/// 长度不足头部元素个数时返回 `None`。
/// 目标置信度不足时在扫描类别前直接返回；类别分数相同时取编号最小者。
/// 坐标按 `as i32` 向零截断。
#[inline]
pub fn decode_anchor(
  anchor: &[f32],
  scale: Scale,
  thresholds: &ThresholdConfig,
) -> Option<BoundingBox> {
  if anchor.len() < ANCHOR_HEADER_LEN {
    return None;
  }
  let objectness = anchor[OBJECTNESS_OFFSET];
  if objectness.is_nan() || objectness < thresholds.box_confidence {
    return None;
  }

  let mut class_id = 0;
  let mut confidence = 0.0f32;
  for (index, &score) in anchor[ANCHOR_HEADER_LEN..].iter().enumerate() {
    if score > confidence {
      confidence = score;
      class_id = index;
    }
  }

  if confidence < thresholds.class_confidence {
    return None;
  }

  let cx = (anchor[0] * scale.x) as i32;
  let cy = (anchor[1] * scale.y) as i32;
  let w = (anchor[2] * scale.x) as i32;
  let h = (anchor[3] * scale.y) as i32;

  Some(BoundingBox {
    class_id,
    label: String::new(),
    confidence,
    x: cx - w / 2,
    y: cy - h / 2,
    w,
    h,
  })
}

/// 遍历输出缓冲中的所有锚框，将通过阈值的候选框追加到 `out`
///
/// 返回追加的数量。
pub fn collect_candidates(
  data: &[f32],
  anchor_count: usize,
  num_classes: usize,
  scale: Scale,
  thresholds: &ThresholdConfig,
  out: &mut Vec<BoundingBox>,
) -> usize {
  let stride = ANCHOR_HEADER_LEN + num_classes;
  let available = data.len() / stride;
  if available < anchor_count {
    warn!(
      "输出缓冲不足: 期望 {} 个锚框, 实际只有 {}",
      anchor_count, available
    );
  }

  let before = out.len();
  out.extend(
    data
      .chunks_exact(stride)
      .take(anchor_count)
      .filter_map(|anchor| decode_anchor(anchor, scale, thresholds)),
  );
  out.len() - before
}
