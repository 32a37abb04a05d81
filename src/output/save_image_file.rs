// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/save_image_file.rs - 保存检测结果图像
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectionResult,
  output::{Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 将检测框绘制到原图并保存，`?crop` 时同时绘制推理区域
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch);
    }

    let draw = if url.query_pairs().any(|(k, _)| k == "crop") {
      Draw::default().with_crop()
    } else {
      Draw::default()
    };

    Ok(SaveImageFileOutput {
      path: PathBuf::from(url.path()),
      draw,
    })
  }
}

impl Render<RgbImage, DetectionResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbImage, result: &DetectionResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    image.save(&self.path)?;
    info!("结果已保存到: {}", self.path.display());
    Ok(())
  }
}
