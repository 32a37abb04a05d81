// 该文件是 Beifeng （北风） 项目的一部分。
// src/transform.rs - 裁剪、缩放与颜色转换
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::str::FromStr;

use image::{
  RgbImage,
  imageops::{self, FilterType},
};

use crate::frame::RgbNhwcFrame;

/// 原图中送入模型的矩形区域（左上角 + 尺寸）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CropRegion {
  pub x: i32,
  pub y: i32,
  pub w: i32,
  pub h: i32,
}

impl CropRegion {
  pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
    Self { x, y, w, h }
  }

  pub fn whole(width: u32, height: u32) -> Self {
    Self::new(0, 0, width as i32, height as i32)
  }

  /// 与 `[0, width) × [0, height)` 求交
  pub fn clamp_to(&self, width: u32, height: u32) -> Self {
    let (width, height) = (width as i64, height as i64);
    let x0 = (self.x as i64).clamp(0, width);
    let y0 = (self.y as i64).clamp(0, height);
    let x1 = (self.x as i64 + self.w as i64).clamp(x0, width);
    let y1 = (self.y as i64 + self.h as i64).clamp(y0, height);
    Self::new(x0 as i32, y0 as i32, (x1 - x0) as i32, (y1 - y0) as i32)
  }

  pub fn is_empty(&self) -> bool {
    self.w <= 0 || self.h <= 0
  }

  fn within(&self, width: u32, height: u32) -> bool {
    self.x >= 0
      && self.y >= 0
      && self.x as i64 + self.w as i64 <= width as i64
      && self.y as i64 + self.h as i64 <= height as i64
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 裁剪区域与模型输入宽高比不一致时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CropMode {
  /// 直接拉伸到模型输入尺寸
  #[default]
  Stretch,
  /// 居中裁掉多余部分以匹配宽高比
  Cut,
  /// 居中扩展并以黑边填充以匹配宽高比
  Expand,
}

impl FromStr for CropMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "stretch" => Ok(CropMode::Stretch),
      "cut" => Ok(CropMode::Cut),
      "expand" | "letterbox" => Ok(CropMode::Expand),
      _ => Err(format!("未知的裁剪模式: {}", s)),
    }
  }
}

impl CropMode {
  /// 根据目标尺寸调整裁剪区域，返回实际映射到整个目标缓冲的区域
  pub fn fit(&self, crop: CropRegion, dst_w: usize, dst_h: usize) -> CropRegion {
    if crop.is_empty() || dst_w == 0 || dst_h == 0 {
      return crop;
    }
    let (cw, ch) = (crop.w as i64, crop.h as i64);
    let (dw, dh) = (dst_w as i64, dst_h as i64);
    // cw / ch 与 dw / dh 比较
    let wider = cw * dh > ch * dw;

    match self {
      CropMode::Stretch => crop,
      CropMode::Cut if wider => {
        let w = ch * dw / dh;
        CropRegion::new(crop.x + ((cw - w) / 2) as i32, crop.y, w as i32, crop.h)
      }
      CropMode::Cut => {
        let h = cw * dh / dw;
        CropRegion::new(crop.x, crop.y + ((ch - h) / 2) as i32, crop.w, h as i32)
      }
      CropMode::Expand if wider => {
        let h = cw * dh / dw;
        CropRegion::new(crop.x, crop.y - ((h - ch) / 2) as i32, crop.w, h as i32)
      }
      CropMode::Expand => {
        let w = ch * dw / dh;
        CropRegion::new(crop.x - ((w - cw) / 2) as i32, crop.y, w as i32, crop.h)
      }
    }
  }
}

/// 将任意图像映射为模型输入缓冲
pub trait ImageTransform {
  /// 返回实际映射到 `dst` 的原图区域，可能超出原图边界（超出部分为黑色）
  fn crop_resize_convert(
    &self,
    src: &RgbImage,
    dst: &mut RgbNhwcFrame,
    crop: CropRegion,
    color_order: ColorOrder,
    crop_mode: CropMode,
  ) -> CropRegion;
}

/// 基于 `image::imageops` 的实现
#[derive(Debug, Clone, Copy)]
pub struct ImageOpsTransform {
  filter: FilterType,
}

impl Default for ImageOpsTransform {
  fn default() -> Self {
    Self {
      filter: FilterType::Triangle,
    }
  }
}

impl ImageOpsTransform {
  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }
}

impl ImageTransform for ImageOpsTransform {
  fn crop_resize_convert(
    &self,
    src: &RgbImage,
    dst: &mut RgbNhwcFrame,
    crop: CropRegion,
    color_order: ColorOrder,
    crop_mode: CropMode,
  ) -> CropRegion {
    let (dst_w, dst_h) = (dst.width(), dst.height());
    let region = crop_mode.fit(crop, dst_w, dst_h);
    if region.is_empty() {
      dst.fill(0);
      return region;
    }

    let (src_w, src_h) = src.dimensions();
    let cropped = if region == CropRegion::whole(src_w, src_h) {
      None
    } else if region.within(src_w, src_h) {
      Some(
        imageops::crop_imm(
          src,
          region.x as u32,
          region.y as u32,
          region.w as u32,
          region.h as u32,
        )
        .to_image(),
      )
    } else {
      let mut canvas = RgbImage::new(region.w as u32, region.h as u32);
      imageops::overlay(&mut canvas, src, -(region.x as i64), -(region.y as i64));
      Some(canvas)
    };
    let cropped = cropped.as_ref().unwrap_or(src);

    let swap_rb = color_order == ColorOrder::Bgr;
    if cropped.dimensions() == (dst_w as u32, dst_h as u32) {
      dst.copy_from_image(cropped, swap_rb);
    } else {
      let resized = imageops::resize(cropped, dst_w as u32, dst_h as u32, self.filter);
      dst.copy_from_image(&resized, swap_rb);
    }
    region
  }
}
