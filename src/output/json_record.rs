// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/json_record.rs - JSON 检测记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{fs::OpenOptions, io::Write, path::PathBuf};

use image::RgbImage;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectionResult,
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

pub fn result_to_json(result: &DetectionResult) -> Value {
  let boxes: Vec<Value> = result
    .bbox_list
    .iter()
    .map(|bbox| {
      json!({
        "class_id": bbox.class_id,
        "label": bbox.label,
        "confidence": bbox.confidence,
        "x": bbox.x,
        "y": bbox.y,
        "w": bbox.w,
        "h": bbox.h,
      })
    })
    .collect();

  json!({
    "bbox_list": boxes,
    "crop": {
      "x": result.crop.x,
      "y": result.crop.y,
      "w": result.crop.w,
      "h": result.crop.h,
    },
    "time_pre_process": result.time_pre_process,
    "time_inference": result.time_inference,
    "time_post_process": result.time_post_process,
  })
}

/// 写出检测结果；`?lines` 时每帧追加一行，否则覆盖写入
pub struct JsonRecordOutput {
  path: PathBuf,
  lines: bool,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch);
    }
    Ok(JsonRecordOutput {
      path: PathBuf::from(url.path()),
      lines: url.query_pairs().any(|(k, _)| k == "lines"),
    })
  }
}

impl Render<RgbImage, DetectionResult> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, _frame: &RgbImage, result: &DetectionResult) -> Result<(), Self::Error> {
    let value = result_to_json(result);
    if self.lines {
      let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&self.path)?;
      writeln!(file, "{}", serde_json::to_string(&value)?)?;
    } else {
      std::fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
    }
    Ok(())
  }
}
