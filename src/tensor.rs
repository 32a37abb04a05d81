// 该文件是 Beifeng （北风） 项目的一部分。
// src/tensor.rs - 输入/输出张量描述
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::frame::{RGB_CHANNELS, RgbNhwcFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Nchw,
  Nhwc,
}

/// 像素归一化参数：`(v / 255 - mean) / norm`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
  pub mean: [f32; 3],
  pub norm: [f32; 3],
}

impl Default for Normalize {
  // 归一化到 [0.0, 1.0]
  fn default() -> Self {
    Self {
      mean: [0.0; 3],
      norm: [1.0; 3],
    }
  }
}

impl Normalize {
  #[inline]
  pub fn apply(&self, channel: usize, value: u8) -> f32 {
    (value as f32 / 255.0 - self.mean[channel]) / self.norm[channel]
  }
}

/// 送入模型的图像信息，由预处理阶段记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageInfo {
  pub width: usize,
  pub height: usize,
  pub channel: usize,
  pub crop_x: i32,
  pub crop_y: i32,
  pub crop_width: i32,
  pub crop_height: i32,
  pub is_bgr: bool,
  pub swap_color: bool,
}

#[derive(Debug, Clone)]
pub struct InputTensorInfo {
  pub name: String,
  /// `[N, C, H, W]` 或 `[N, H, W, C]`，取决于 `layout`
  pub dims: [usize; 4],
  pub layout: TensorLayout,
  pub normalize: Normalize,
  pub image_info: ImageInfo,
  /// 模型输入尺寸的图像缓冲
  pub frame: RgbNhwcFrame,
}

impl InputTensorInfo {
  pub fn new(name: &str, dims: [usize; 4], layout: TensorLayout) -> Self {
    let (height, width) = match layout {
      TensorLayout::Nchw => (dims[2], dims[3]),
      TensorLayout::Nhwc => (dims[1], dims[2]),
    };
    Self {
      name: name.to_string(),
      dims,
      layout,
      normalize: Normalize::default(),
      image_info: ImageInfo::default(),
      frame: RgbNhwcFrame::with_shape(height, width),
    }
  }

  pub fn width(&self) -> usize {
    self.frame.width()
  }

  pub fn height(&self) -> usize {
    self.frame.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }
}

/// 输出张量描述，数据由推理后端就地填充
///
/// 构造时 `dims` 中的 0 表示动态维度，每次填充时根据元素数重新推导。
#[derive(Debug, Clone)]
pub struct OutputTensorInfo {
  pub name: String,
  /// 最近一次填充后的形状
  pub dims: Vec<usize>,
  template: Vec<usize>,
  data: Vec<f32>,
}

impl OutputTensorInfo {
  pub fn new(name: &str, dims: Vec<usize>) -> Self {
    Self {
      name: name.to_string(),
      template: dims.clone(),
      dims,
      data: Vec::new(),
    }
  }

  pub fn as_f32(&self) -> &[f32] {
    &self.data
  }

  /// 以给定形状写入数据，复用已有缓冲
  pub fn fill(&mut self, dims: &[usize], data: &[f32]) {
    self.dims.clear();
    self.dims.extend_from_slice(dims);
    self.data.clear();
    self.data.extend_from_slice(data);
  }

  /// 写入数据，形状由已有 `dims` 中的动态维度推导
  pub fn fill_flat(&mut self, data: &[f32]) {
    self.resolve_dims(data.len());
    self.data.clear();
    self.data.extend_from_slice(data);
  }

  fn resolve_dims(&mut self, len: usize) {
    self.dims.clear();
    self.dims.extend_from_slice(&self.template);
    let known: usize = self.dims.iter().filter(|&&d| d != 0).product();
    match self.dims.iter().position(|&d| d == 0) {
      Some(idx) if known > 0 => self.dims[idx] = len / known,
      Some(_) => {}
      None if self.dims.is_empty() => self.dims.push(len),
      None => {}
    }
  }

  pub fn element_count(&self) -> usize {
    self.data.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_normalize_maps_to_unit_range() {
    let n = Normalize::default();
    assert_eq!(n.apply(0, 0), 0.0);
    assert_eq!(n.apply(1, 255), 1.0);
  }

  #[test]
  fn dynamic_anchor_dim_is_resolved_from_length() {
    let mut out = OutputTensorInfo::new("output", vec![1, 0, 85]);
    out.fill_flat(&vec![0.0; 85 * 12]);
    assert_eq!(out.dims, vec![1, 12, 85]);
    assert_eq!(out.element_count(), 85 * 12);
  }

  #[test]
  fn anchor_dim_follows_each_fill() {
    let mut out = OutputTensorInfo::new("output", vec![1, 0, 85]);
    out.fill_flat(&vec![0.0; 85 * 12]);
    out.fill_flat(&vec![0.0; 85 * 7]);
    assert_eq!(out.dims, vec![1, 7, 85]);

    out.fill(&[1, 3, 85], &vec![0.0; 85 * 3]);
    out.fill_flat(&vec![0.0; 85 * 20]);
    assert_eq!(out.dims, vec![1, 20, 85]);
  }

  #[test]
  fn nchw_input_takes_spatial_size_from_last_dims() {
    let info = InputTensorInfo::new("images", [1, 3, 384, 640], TensorLayout::Nchw);
    assert_eq!(info.width(), 640);
    assert_eq!(info.height(), 384);
    assert_eq!(info.channels(), 3);
  }
}
