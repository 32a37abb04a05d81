// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/engine.rs - 检测引擎
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  time::Instant,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  label::LabelTable,
  model::{
    BoundingBox, DetectionResult, EngineConfig, Model, Scale, ThresholdConfig, collect_candidates,
  },
  nms::{GreedyNms, Suppress},
  runtime::{self, InferenceRuntime, RuntimeError, RuntimeKind},
  tensor::{ImageInfo, InputTensorInfo, OutputTensorInfo, TensorLayout},
  transform::{ColorOrder, CropRegion, ImageOpsTransform, ImageTransform},
};

/// 根据后端种类创建推理后端
pub type RuntimeFactory = Box<dyn Fn(RuntimeKind) -> Option<Box<dyn InferenceRuntime>>>;

#[derive(Error, Debug)]
pub enum InitError {
  #[error("无法创建推理后端 {0:?}")]
  RuntimeUnavailable(RuntimeKind),
  #[error("设备配置失败: {0}")]
  Device(#[source] RuntimeError),
  #[error("线程数配置失败: {0}")]
  Threads(#[source] RuntimeError),
  #[error("模型加载失败 {path}: {source}")]
  ModelLoad { path: PathBuf, source: RuntimeError },
  #[error("标签文件读取失败 {path}: {source}")]
  Label {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("标签数量 {found} 少于类别数 {expected}")]
  LabelCount { expected: usize, found: usize },
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("初始化失败: {0}")]
  Initialization(#[from] InitError),
  #[error("推理引擎未初始化")]
  NotInitialized,
  #[error("推理失败: {0}")]
  Inference(#[source] RuntimeError),
}

/// 初始化成功后才存在的状态
struct Active {
  runtime: Box<dyn InferenceRuntime>,
  labels: LabelTable,
}

/// 单阶段锚框检测器的推理引擎
///
/// 同一实例不可并发调用 `process`；需要并发时使用多个实例。
pub struct DetectionEngine {
  config: EngineConfig,
  factory: RuntimeFactory,
  transform: Box<dyn ImageTransform>,
  suppressor: Box<dyn Suppress>,
  active: Option<Active>,
  input_tensor_info_list: Vec<InputTensorInfo>,
  output_tensor_info_list: Vec<OutputTensorInfo>,
  candidates: Vec<BoundingBox>,
}

fn elapsed_ms(start: Instant) -> f64 {
  start.elapsed().as_secs_f64() * 1000.0
}

impl DetectionEngine {
  pub fn new(config: EngineConfig) -> Self {
    Self {
      config,
      factory: Box::new(runtime::create),
      transform: Box::new(ImageOpsTransform::default()),
      suppressor: Box::new(GreedyNms::default()),
      active: None,
      input_tensor_info_list: Vec::new(),
      output_tensor_info_list: Vec::new(),
      candidates: Vec::new(),
    }
  }

  pub fn with_runtime_factory<F>(mut self, factory: F) -> Self
  where
    F: Fn(RuntimeKind) -> Option<Box<dyn InferenceRuntime>> + 'static,
  {
    self.factory = Box::new(factory);
    self
  }

  pub fn with_transform(mut self, transform: impl ImageTransform + 'static) -> Self {
    self.transform = Box::new(transform);
    self
  }

  pub fn with_suppressor(mut self, suppressor: impl Suppress + 'static) -> Self {
    self.suppressor = Box::new(suppressor);
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn is_initialized(&self) -> bool {
    self.active.is_some()
  }

  pub fn labels(&self) -> Option<&LabelTable> {
    self.active.as_ref().map(|active| &active.labels)
  }

  pub fn thresholds(&self) -> ThresholdConfig {
    self.config.thresholds
  }

  /// 立即作用于下一次 `process`
  pub fn set_thresholds(&mut self, box_confidence: f32, class_confidence: f32, nms_iou: f32) {
    self.config.thresholds = ThresholdConfig {
      box_confidence,
      class_confidence,
      nms_iou,
    };
  }

  fn build_tensor_info(&mut self) {
    let config = &self.config;

    let mut input = InputTensorInfo::new(
      &config.input_name,
      [1, 3, config.input_height, config.input_width],
      TensorLayout::Nchw,
    );
    input.normalize = config.normalize;
    self.input_tensor_info_list.clear();
    self.input_tensor_info_list.push(input);

    // 锚框数量由推理结果的形状决定
    self.output_tensor_info_list.clear();
    self.output_tensor_info_list.push(OutputTensorInfo::new(
      &config.output_name,
      vec![1, 0, config.element_num_of_anchor()],
    ));
  }

  /// 创建推理后端、加载模型与标签
  ///
  /// 任一步骤失败时引擎保持未初始化状态。
  pub fn initialize(
    &mut self,
    model_dir: impl AsRef<Path>,
    num_threads: usize,
  ) -> Result<(), EngineError> {
    if let Some(mut previous) = self.active.take() {
      warn!("引擎已初始化，释放旧的推理后端");
      previous.runtime.finalize();
    }

    let model_dir = model_dir.as_ref();
    let model_path = model_dir.join(self.config.model_file_name());
    let label_path = model_dir.join(&self.config.label_file);

    self.build_tensor_info();

    let kind = self.config.runtime;
    let mut runtime = (self.factory)(kind).ok_or_else(|| {
      error!("无法创建推理后端 {:?}", kind);
      InitError::RuntimeUnavailable(kind)
    })?;

    if let Some(device) = self.config.device {
      match runtime.device_select() {
        Some(selector) => selector.select_device(device).map_err(InitError::Device)?,
        None => warn!("推理后端 {:?} 不支持设备选择，忽略 {}", kind, device),
      }
    }

    runtime
      .set_num_threads(num_threads)
      .map_err(InitError::Threads)?;

    runtime
      .initialize(
        &model_path,
        &self.input_tensor_info_list,
        &self.output_tensor_info_list,
      )
      .map_err(|source| {
        error!("模型加载失败 {}: {}", model_path.display(), source);
        InitError::ModelLoad {
          path: model_path.clone(),
          source,
        }
      })?;

    let labels = match LabelTable::read(&label_path) {
      Ok(labels) => labels,
      Err(source) => {
        runtime.finalize();
        return Err(
          InitError::Label {
            path: label_path,
            source,
          }
          .into(),
        );
      }
    };
    if labels.len() < self.config.num_classes {
      runtime.finalize();
      return Err(
        InitError::LabelCount {
          expected: self.config.num_classes,
          found: labels.len(),
        }
        .into(),
      );
    }

    info!(
      "检测引擎初始化完成: {} 个类别, 输入 {}x{}",
      labels.len(),
      self.config.input_width,
      self.config.input_height
    );
    self.candidates.clear();
    self.active = Some(Active { runtime, labels });
    Ok(())
  }

  /// 释放推理后端
  pub fn finalize(&mut self) -> Result<(), EngineError> {
    let Some(mut active) = self.active.take() else {
      error!("推理后端尚未创建");
      return Err(EngineError::NotInitialized);
    };
    active.runtime.finalize();
    info!("检测引擎已释放");
    Ok(())
  }

  /// 对整幅图像进行检测
  pub fn process(&mut self, image: &RgbImage) -> Result<DetectionResult, EngineError> {
    let crop = CropRegion::whole(image.width(), image.height());
    self.process_with_crop(image, crop)
  }

  /// 对图像中的指定区域进行检测，结果坐标位于原图空间
  pub fn process_with_crop(
    &mut self,
    image: &RgbImage,
    crop: CropRegion,
  ) -> Result<DetectionResult, EngineError> {
    let Some(active) = self.active.as_mut() else {
      error!("推理后端尚未创建");
      return Err(EngineError::NotInitialized);
    };

    // 预处理
    let t_pre_process0 = Instant::now();
    let input = &mut self.input_tensor_info_list[0];
    let region = self.transform.crop_resize_convert(
      image,
      &mut input.frame,
      crop,
      self.config.color_order,
      self.config.crop_mode,
    );
    input.image_info = ImageInfo {
      width: input.frame.width(),
      height: input.frame.height(),
      channel: input.frame.channels(),
      crop_x: 0,
      crop_y: 0,
      crop_width: input.frame.width() as i32,
      crop_height: input.frame.height() as i32,
      is_bgr: self.config.color_order == ColorOrder::Bgr,
      swap_color: false,
    };
    let (input_width, input_height) = (input.width(), input.height());

    active
      .runtime
      .preprocess(&self.input_tensor_info_list)
      .map_err(|e| {
        error!("预处理失败: {}", e);
        EngineError::Inference(e)
      })?;
    let time_pre_process = elapsed_ms(t_pre_process0);

    // 推理
    let t_inference0 = Instant::now();
    active
      .runtime
      .run(&mut self.output_tensor_info_list)
      .map_err(|e| {
        error!("推理失败: {}", e);
        EngineError::Inference(e)
      })?;
    let time_inference = elapsed_ms(t_inference0);

    // 后处理
    let t_post_process0 = Instant::now();
    let output = &self.output_tensor_info_list[0];
    let element_num = self.config.element_num_of_anchor();
    let anchor_box_num = match output.dims.as_slice() {
      [_, anchors, elements] if *elements == element_num => *anchors,
      dims => {
        error!("输出张量形状 {:?} 与每锚框 {} 个元素不符", dims, element_num);
        return Err(EngineError::Inference(RuntimeError::TensorMismatch(
          format!("输出形状 {:?}, 期望 [1, N, {}]", dims, element_num),
        )));
      }
    };

    let scale = Scale::from_crop(region.w, region.h, input_width, input_height);
    let thresholds = self.config.thresholds;
    self.candidates.clear();
    collect_candidates(
      output.as_f32(),
      anchor_box_num,
      self.config.num_classes,
      scale,
      &thresholds,
      &mut self.candidates,
    );

    // 还原到原图坐标并填写标签
    for bbox in self.candidates.iter_mut() {
      bbox.x += region.x;
      bbox.y += region.y;
      bbox.label = active
        .labels
        .get(bbox.class_id)
        .map(str::to_string)
        .unwrap_or_default();
    }

    let bbox_list = self
      .suppressor
      .suppress(&mut self.candidates, thresholds.nms_iou);
    let time_post_process = elapsed_ms(t_post_process0);

    debug!(
      "锚框 {}, 候选 {}, 保留 {}; 耗时 预处理 {:.2} ms / 推理 {:.2} ms / 后处理 {:.2} ms",
      anchor_box_num,
      self.candidates.len(),
      bbox_list.len(),
      time_pre_process,
      time_inference,
      time_post_process
    );

    Ok(DetectionResult {
      bbox_list,
      crop: region.clamp_to(image.width(), image.height()),
      time_pre_process,
      time_inference,
      time_post_process,
    })
  }
}

impl Model for DetectionEngine {
  type Input = RgbImage;
  type Output = DetectionResult;
  type Error = EngineError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.process(input)
  }
}

impl Drop for DetectionEngine {
  fn drop(&mut self) {
    if let Some(mut active) = self.active.take() {
      active.runtime.finalize();
    }
  }
}
