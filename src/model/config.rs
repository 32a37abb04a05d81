// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/config.rs - 引擎配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  model::{ANCHOR_HEADER_LEN, DetectionEngine, EngineError, ThresholdConfig},
  runtime::{Device, RuntimeKind},
  tensor::Normalize,
  transform::{ColorOrder, CropMode},
};

const DEFAULT_MODEL_STEM: &str = "yolov7-tiny_384x640";
const DEFAULT_LABEL_FILE: &str = "label_coco_80.txt";
const DEFAULT_INPUT_NAME: &str = "images";
const DEFAULT_OUTPUT_NAME: &str = "output";
const DEFAULT_INPUT_W: usize = 640;
const DEFAULT_INPUT_H: usize = 384;
const DEFAULT_CLASS_NUM: usize = 80;
const DEFAULT_NUM_THREADS: usize = 4;

/// 检测引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub runtime: RuntimeKind,
  /// 为 `None` 时不调用设备选择
  pub device: Option<Device>,
  /// 为 `None` 时使用默认模型名加后端扩展名
  pub model_file: Option<String>,
  pub label_file: String,
  pub input_name: String,
  pub output_name: String,
  pub input_width: usize,
  pub input_height: usize,
  pub num_classes: usize,
  pub normalize: Normalize,
  pub color_order: ColorOrder,
  pub crop_mode: CropMode,
  pub thresholds: ThresholdConfig,
}

impl EngineConfig {
  pub fn new(runtime: RuntimeKind) -> Self {
    Self {
      runtime,
      device: None,
      model_file: None,
      label_file: DEFAULT_LABEL_FILE.to_string(),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      input_width: DEFAULT_INPUT_W,
      input_height: DEFAULT_INPUT_H,
      num_classes: DEFAULT_CLASS_NUM,
      normalize: Normalize::default(),
      color_order: ColorOrder::Rgb,
      crop_mode: CropMode::Stretch,
      thresholds: ThresholdConfig::default(),
    }
  }

  pub fn model_file_name(&self) -> String {
    match &self.model_file {
      Some(name) => name.clone(),
      None => format!("{}.{}", DEFAULT_MODEL_STEM, self.runtime.model_extension()),
    }
  }

  /// 每个锚框的元素个数: x, y, w, h, 目标置信度, [类别置信度]
  pub fn element_num_of_anchor(&self) -> usize {
    ANCHOR_HEADER_LEN + self.num_classes
  }
}

#[derive(Error, Debug)]
pub enum EngineBuilderError {
  #[error("模型 URL 方案不支持: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
}

impl EngineBuilderError {
  fn invalid(key: &str, value: &str) -> Self {
    EngineBuilderError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

/// 通过 URL 构造检测引擎
///
/// `onnx:///path/to/models?threads=4&box=0.3&device=cuda:0`，方案选择推理后端，
/// 路径为模型目录。
pub struct EngineBuilder {
  config: EngineConfig,
  model_dir: PathBuf,
  num_threads: usize,
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, EngineBuilderError> {
  value
    .parse::<T>()
    .map_err(|_| EngineBuilderError::invalid(key, value))
}

impl FromUrl for EngineBuilder {
  type Error = EngineBuilderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let runtime = url
      .scheme()
      .parse::<RuntimeKind>()
      .map_err(|_| EngineBuilderError::SchemeMismatch(url.scheme().to_string()))?;

    let mut builder = EngineBuilder::new(runtime, url.path());
    let config = &mut builder.config;

    for (key, value) in url.query_pairs() {
      debug!("模型参数: {} = {}", key, value);
      match key.as_ref() {
        "threads" => builder.num_threads = parse(&key, &value)?,
        "box" => config.thresholds.box_confidence = parse(&key, &value)?,
        "class" => config.thresholds.class_confidence = parse(&key, &value)?,
        "nms" => config.thresholds.nms_iou = parse(&key, &value)?,
        "device" => {
          config.device = Some(
            value
              .parse::<Device>()
              .map_err(|_| EngineBuilderError::invalid(&key, &value))?,
          )
        }
        "crop" => {
          config.crop_mode = value
            .parse::<CropMode>()
            .map_err(|_| EngineBuilderError::invalid(&key, &value))?
        }
        "bgr" => {
          config.color_order = if parse::<bool>(&key, &value)? {
            ColorOrder::Bgr
          } else {
            ColorOrder::Rgb
          }
        }
        "classes" => config.num_classes = parse(&key, &value)?,
        "width" => config.input_width = parse(&key, &value)?,
        "height" => config.input_height = parse(&key, &value)?,
        "model" => config.model_file = Some(value.to_string()),
        "labels" => config.label_file = value.to_string(),
        _ => warn!("忽略未知的模型参数: {}", key),
      }
    }

    Ok(builder)
  }
}

impl EngineBuilder {
  pub fn new(runtime: RuntimeKind, model_dir: impl Into<PathBuf>) -> Self {
    Self {
      config: EngineConfig::new(runtime),
      model_dir: model_dir.into(),
      num_threads: DEFAULT_NUM_THREADS,
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn num_threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  pub fn thresholds(mut self, thresholds: ThresholdConfig) -> Self {
    self.config.thresholds = thresholds;
    self
  }

  pub fn device(mut self, device: Device) -> Self {
    self.config.device = Some(device);
    self
  }

  /// 创建引擎并完成初始化
  pub fn build(self) -> Result<DetectionEngine, EngineError> {
    info!(
      "初始化检测引擎: 后端 {:?}, 模型目录 {}",
      self.config.runtime,
      self.model_dir.display()
    );
    let mut engine = DetectionEngine::new(self.config);
    engine.initialize(&self.model_dir, self.num_threads)?;
    Ok(engine)
  }
}
