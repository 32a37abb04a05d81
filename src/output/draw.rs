// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::{BoundingBox, DetectionResult};

const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const CROP_COLOR: [u8; 3] = [255, 255, 0];

pub struct Draw {
  thickness: i32,
  box_color: [u8; 3],
  crop_color: Option<[u8; 3]>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      box_color: BOX_COLOR,
      crop_color: None,
    }
  }
}

impl Draw {
  pub fn with_crop(mut self) -> Self {
    self.crop_color = Some(CROP_COLOR);
    self
  }

  // 逐像素向内收缩以加粗边框，超出图像的部分由 imageproc 裁掉
  fn draw_rect(&self, image: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: [u8; 3]) {
    for t in 0..self.thickness {
      let (rw, rh) = (w - 2 * t, h - 2 * t);
      if rw <= 0 || rh <= 0 {
        break;
      }
      let rect = Rect::at(x + t, y + t).of_size(rw as u32, rh as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BoundingBox) {
    self.draw_rect(image, bbox.x, bbox.y, bbox.w, bbox.h, self.box_color);
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectionResult) {
    if let Some(color) = self.crop_color {
      let crop = result.crop;
      self.draw_rect(image, crop.x, crop.y, crop.w, crop.h, color);
    }
    for bbox in result.bbox_list.iter() {
      self.draw_bbox(image, bbox);
    }
  }

  pub fn draw_detection(&self, frame: &RgbImage, result: &DetectionResult) -> RgbImage {
    let mut image = frame.clone();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}
