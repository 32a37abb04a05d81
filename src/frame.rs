// 该文件是 Beifeng （北风） 项目的一部分。
// src/frame.rs - 模型输入帧定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;

use crate::{input::AsNhwcFrame, tensor::Normalize};

pub const RGB_CHANNELS: usize = 3;

/// 模型输入尺寸的 RGB 帧，按 NHWC 排列的 u8 数据
///
/// 由引擎持有并在每次推理时复用。
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  pub fn fill(&mut self, value: u8) {
    self.data.fill(value);
  }

  /// 将同尺寸图像拷贝进帧，`swap_rb` 为真时交换 R/B 通道
  pub fn copy_from_image(&mut self, image: &RgbImage, swap_rb: bool) {
    debug_assert_eq!(image.width() as usize, self.width);
    debug_assert_eq!(image.height() as usize, self.height);

    let raw = image.as_raw();
    if !swap_rb {
      self.data.copy_from_slice(raw);
      return;
    }
    for (dst, src) in self
      .data
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(raw.chunks_exact(RGB_CHANNELS))
    {
      dst[0] = src[2];
      dst[1] = src[1];
      dst[2] = src[0];
    }
  }

  /// 转为归一化后的 NCHW 浮点张量，写入 `out`（复用其容量）
  pub fn write_nchw_f32(&self, normalize: &Normalize, out: &mut Vec<f32>) {
    let plane = self.width * self.height;
    out.clear();
    out.resize(plane * RGB_CHANNELS, 0.0);

    for (idx, pixel) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for c in 0..RGB_CHANNELS {
        out[c * plane + idx] = normalize.apply(c, pixel[c]);
      }
    }
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn nchw_planes_follow_channel_order() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 51]));
    image.put_pixel(1, 0, Rgb([0, 255, 102]));
    let frame = RgbNhwcFrame::from(image);

    let mut out = Vec::new();
    frame.write_nchw_f32(&Normalize::default(), &mut out);

    assert_eq!(out.len(), 6);
    assert_eq!(out[0], 1.0);
    assert_eq!(out[1], 0.0);
    assert_eq!(out[2], 0.0);
    assert_eq!(out[3], 1.0);
    assert!((out[4] - 0.2).abs() < 1e-6);
    assert!((out[5] - 0.4).abs() < 1e-6);
  }

  #[test]
  fn copy_with_swap_exchanges_red_and_blue() {
    let mut image = RgbImage::new(1, 1);
    image.put_pixel(0, 0, Rgb([10, 20, 30]));
    let mut frame = RgbNhwcFrame::with_shape(1, 1);

    frame.copy_from_image(&image, true);
    assert_eq!(frame.pixel(0, 0), [30, 20, 10]);

    frame.copy_from_image(&image, false);
    assert_eq!(frame.pixel(0, 0), [10, 20, 30]);
  }
}
