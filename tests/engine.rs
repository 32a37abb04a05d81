// 该文件是 Beifeng （北风） 项目的一部分。
// tests/engine.rs - 检测引擎流程测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  cell::{Cell, RefCell},
  path::{Path, PathBuf},
  rc::Rc,
};

use image::RgbImage;

use beifeng::{
  model::{BoundingBox, DetectionEngine, EngineConfig, EngineError, InitError, Model},
  nms::Suppress,
  runtime::{Device, DeviceSelect, InferenceRuntime, RuntimeError, RuntimeKind},
  tensor::{InputTensorInfo, OutputTensorInfo},
  transform::CropRegion,
};

const NUM_CLASSES: usize = 80;
const STRIDE: usize = 5 + NUM_CLASSES;

#[derive(Default)]
struct StubState {
  output: Vec<f32>,
  stride: usize,
  fail_run: bool,
  reject_threads: bool,
  model_path: Option<PathBuf>,
  input_size: Option<(usize, usize)>,
  device: Option<Device>,
  finalized: usize,
}

struct StubRuntime {
  state: Rc<RefCell<StubState>>,
}

impl DeviceSelect for StubRuntime {
  fn select_device(&mut self, device: Device) -> Result<(), RuntimeError> {
    if let Device::Dla(_) = device {
      return Err(RuntimeError::UnsupportedDevice(device));
    }
    self.state.borrow_mut().device = Some(device);
    Ok(())
  }
}

impl InferenceRuntime for StubRuntime {
  fn kind(&self) -> RuntimeKind {
    RuntimeKind::Onnx
  }

  fn set_num_threads(&mut self, num_threads: usize) -> Result<(), RuntimeError> {
    if self.state.borrow().reject_threads {
      return Err(RuntimeError::InvalidThreadCount(num_threads));
    }
    Ok(())
  }

  fn initialize(
    &mut self,
    model_path: &Path,
    _inputs: &[InputTensorInfo],
    _outputs: &[OutputTensorInfo],
  ) -> Result<(), RuntimeError> {
    self.state.borrow_mut().model_path = Some(model_path.to_path_buf());
    Ok(())
  }

  fn preprocess(&mut self, inputs: &[InputTensorInfo]) -> Result<(), RuntimeError> {
    self.state.borrow_mut().input_size = Some((inputs[0].width(), inputs[0].height()));
    Ok(())
  }

  fn run(&mut self, outputs: &mut [OutputTensorInfo]) -> Result<(), RuntimeError> {
    let state = self.state.borrow();
    if state.fail_run {
      return Err(RuntimeError::backend("stub failure"));
    }
    let stride = if state.stride == 0 { STRIDE } else { state.stride };
    outputs[0].fill(&[1, state.output.len() / stride, stride], &state.output);
    Ok(())
  }

  fn finalize(&mut self) {
    self.state.borrow_mut().finalized += 1;
  }

  fn device_select(&mut self) -> Option<&mut dyn DeviceSelect> {
    Some(self)
  }
}

fn anchor(cx: f32, cy: f32, w: f32, h: f32, objectness: f32, class_id: usize, score: f32) -> Vec<f32> {
  let mut data = vec![0.0; STRIDE];
  data[..5].copy_from_slice(&[cx, cy, w, h, objectness]);
  data[5 + class_id] = score;
  data
}

fn model_dir(name: &str, label_count: usize) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("beifeng-engine-{}-{}", std::process::id(), name));
  std::fs::create_dir_all(&dir).unwrap();
  let labels: Vec<String> = (0..label_count).map(|i| format!("class{}", i)).collect();
  std::fs::write(dir.join("label_coco_80.txt"), labels.join("\n")).unwrap();
  dir
}

fn stub_engine(config: EngineConfig, state: &Rc<RefCell<StubState>>) -> DetectionEngine {
  let state = Rc::clone(state);
  DetectionEngine::new(config).with_runtime_factory(move |kind| {
    assert_eq!(kind, RuntimeKind::Onnx);
    Some(Box::new(StubRuntime {
      state: Rc::clone(&state),
    }) as Box<dyn InferenceRuntime>)
  })
}

fn ready_engine(name: &str, output: Vec<f32>) -> (DetectionEngine, Rc<RefCell<StubState>>) {
  let state = Rc::new(RefCell::new(StubState {
    output,
    ..Default::default()
  }));
  let mut engine = stub_engine(EngineConfig::new(RuntimeKind::Onnx), &state);
  engine.initialize(model_dir(name, NUM_CLASSES), 4).unwrap();
  (engine, state)
}

fn model_input_image() -> RgbImage {
  RgbImage::new(640, 384)
}

#[test]
fn single_anchor_yields_one_box_at_default_thresholds() {
  let (mut engine, state) = ready_engine("single", anchor(100.0, 100.0, 20.0, 40.0, 0.9, 3, 0.5));
  let result = engine.process(&model_input_image()).unwrap();

  assert_eq!(result.len(), 1);
  let bbox = &result.bbox_list[0];
  assert_eq!(bbox.class_id, 3);
  assert_eq!(bbox.label, "class3");
  assert_eq!(bbox.confidence, 0.5);
  assert_eq!((bbox.x, bbox.y, bbox.w, bbox.h), (90, 80, 20, 40));
  assert_eq!(result.crop, CropRegion::new(0, 0, 640, 384));
  assert!(result.time_pre_process >= 0.0);
  assert!(result.time_inference >= 0.0);
  assert!(result.time_post_process >= 0.0);

  let state = state.borrow();
  assert_eq!(state.input_size, Some((640, 384)));
  assert!(
    state
      .model_path
      .as_ref()
      .is_some_and(|p| p.ends_with("yolov7-tiny_384x640.onnx"))
  );
}

#[test]
fn raising_class_threshold_drops_the_box() {
  let (mut engine, _state) = ready_engine("class-threshold", anchor(100.0, 100.0, 20.0, 40.0, 0.9, 3, 0.5));
  engine.set_thresholds(0.2, 0.6, 0.6);
  assert_eq!(engine.thresholds().class_confidence, 0.6);

  let result = engine.process(&model_input_image()).unwrap();
  assert!(result.is_empty());
}

#[test]
fn low_objectness_produces_nothing() {
  let (mut engine, _state) = ready_engine("objectness", anchor(100.0, 100.0, 20.0, 40.0, 0.1, 3, 0.9));
  assert!(engine.process(&model_input_image()).unwrap().is_empty());
}

#[test]
fn overlapping_boxes_of_one_class_are_merged() {
  let mut output = anchor(100.0, 100.0, 40.0, 40.0, 0.9, 2, 0.7);
  output.extend(anchor(102.0, 101.0, 40.0, 40.0, 0.9, 2, 0.8));
  output.extend(anchor(102.0, 101.0, 40.0, 40.0, 0.9, 5, 0.6));
  let (mut engine, _state) = ready_engine("nms", output);

  let result = engine.process(&model_input_image()).unwrap();
  assert_eq!(result.len(), 2);
  assert_eq!(result.bbox_list[0].class_id, 2);
  assert_eq!(result.bbox_list[0].confidence, 0.8);
  assert_eq!(result.bbox_list[1].class_id, 5);
}

struct KeepFirst {
  calls: Rc<Cell<usize>>,
  iou: Rc<Cell<f32>>,
}

impl Suppress for KeepFirst {
  fn suppress(&self, candidates: &mut [BoundingBox], iou_threshold: f32) -> Vec<BoundingBox> {
    self.calls.set(self.calls.get() + 1);
    self.iou.set(iou_threshold);
    candidates.iter().take(1).cloned().collect()
  }
}

#[test]
fn suppression_is_delegated_with_the_configured_iou() {
  let mut output = anchor(100.0, 100.0, 20.0, 20.0, 0.9, 1, 0.5);
  output.extend(anchor(300.0, 200.0, 20.0, 20.0, 0.9, 1, 0.6));
  let state = Rc::new(RefCell::new(StubState {
    output,
    ..Default::default()
  }));
  let calls = Rc::new(Cell::new(0));
  let iou = Rc::new(Cell::new(0.0));
  let mut engine =
    stub_engine(EngineConfig::new(RuntimeKind::Onnx), &state).with_suppressor(KeepFirst {
      calls: Rc::clone(&calls),
      iou: Rc::clone(&iou),
    });
  engine.initialize(model_dir("delegate", NUM_CLASSES), 4).unwrap();
  engine.set_thresholds(0.2, 0.2, 0.45);

  let result = engine.process(&model_input_image()).unwrap();
  assert_eq!(result.len(), 1);
  assert_eq!(calls.get(), 1);
  assert_eq!(iou.get(), 0.45);
}

#[test]
fn crop_offset_maps_back_to_the_original_image() {
  let (mut engine, _state) = ready_engine("offset", anchor(100.0, 100.0, 20.0, 40.0, 0.9, 7, 0.5));
  let image = RgbImage::new(1280, 768);

  let result = engine
    .process_with_crop(&image, CropRegion::new(100, 50, 640, 384))
    .unwrap();
  let bbox = &result.bbox_list[0];
  assert_eq!((bbox.x, bbox.y, bbox.w, bbox.h), (190, 130, 20, 40));
  assert_eq!(bbox.label, "class7");
  assert_eq!(result.crop, CropRegion::new(100, 50, 640, 384));
}

#[test]
fn crop_beyond_the_image_is_reported_clipped() {
  let (mut engine, _state) = ready_engine("clip", anchor(0.0, 0.0, 0.0, 0.0, 0.0, 0, 0.0));

  let result = engine
    .process_with_crop(&model_input_image(), CropRegion::new(600, 300, 200, 200))
    .unwrap();
  assert_eq!(result.crop, CropRegion::new(600, 300, 40, 84));
}

#[test]
fn processing_before_initialize_fails() {
  let state = Rc::new(RefCell::new(StubState::default()));
  let mut engine = stub_engine(EngineConfig::new(RuntimeKind::Onnx), &state);

  assert!(!engine.is_initialized());
  assert!(matches!(
    engine.process(&model_input_image()),
    Err(EngineError::NotInitialized)
  ));
  assert!(matches!(engine.finalize(), Err(EngineError::NotInitialized)));
}

#[test]
fn missing_runtime_leaves_engine_uninitialized() {
  let mut engine =
    DetectionEngine::new(EngineConfig::new(RuntimeKind::Onnx)).with_runtime_factory(|_| None);

  let err = engine.initialize(model_dir("no-runtime", NUM_CLASSES), 4);
  assert!(matches!(
    err,
    Err(EngineError::Initialization(InitError::RuntimeUnavailable(
      RuntimeKind::Onnx
    )))
  ));
  assert!(!engine.is_initialized());
}

#[test]
fn missing_label_file_releases_the_runtime() {
  let state = Rc::new(RefCell::new(StubState::default()));
  let mut engine = stub_engine(EngineConfig::new(RuntimeKind::Onnx), &state);
  let dir = std::env::temp_dir().join(format!("beifeng-engine-{}-no-labels", std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();

  let err = engine.initialize(&dir, 4);
  assert!(matches!(
    err,
    Err(EngineError::Initialization(InitError::Label { .. }))
  ));
  assert!(!engine.is_initialized());
  assert_eq!(state.borrow().finalized, 1);
}

#[test]
fn too_few_labels_is_rejected() {
  let state = Rc::new(RefCell::new(StubState::default()));
  let mut engine = stub_engine(EngineConfig::new(RuntimeKind::Onnx), &state);

  let err = engine.initialize(model_dir("few-labels", 10), 4);
  assert!(matches!(
    err,
    Err(EngineError::Initialization(InitError::LabelCount {
      expected: 80,
      found: 10
    }))
  ));
  assert!(!engine.is_initialized());
}

#[test]
fn rejected_thread_count_fails_initialization() {
  let state = Rc::new(RefCell::new(StubState {
    reject_threads: true,
    ..Default::default()
  }));
  let mut engine = stub_engine(EngineConfig::new(RuntimeKind::Onnx), &state);

  let err = engine.initialize(model_dir("threads", NUM_CLASSES), 0);
  assert!(matches!(
    err,
    Err(EngineError::Initialization(InitError::Threads(
      RuntimeError::InvalidThreadCount(0)
    )))
  ));
  assert!(!engine.is_initialized());
}

#[test]
fn device_is_forwarded_to_capable_runtime() {
  let state = Rc::new(RefCell::new(StubState::default()));
  let mut config = EngineConfig::new(RuntimeKind::Onnx);
  config.device = Some(Device::Cuda(1));
  let mut engine = stub_engine(config, &state);
  engine.initialize(model_dir("device", NUM_CLASSES), 4).unwrap();
  assert_eq!(state.borrow().device, Some(Device::Cuda(1)));

  let mut config = EngineConfig::new(RuntimeKind::Onnx);
  config.device = Some(Device::Dla(0));
  let mut engine = stub_engine(config, &state);
  let err = engine.initialize(model_dir("device-dla", NUM_CLASSES), 4);
  assert!(matches!(
    err,
    Err(EngineError::Initialization(InitError::Device(_)))
  ));
}

#[test]
fn inference_failure_keeps_the_engine_usable() {
  let (mut engine, state) = ready_engine("recover", anchor(100.0, 100.0, 20.0, 40.0, 0.9, 3, 0.5));

  state.borrow_mut().fail_run = true;
  assert!(matches!(
    engine.process(&model_input_image()),
    Err(EngineError::Inference(RuntimeError::Backend(_)))
  ));
  assert!(engine.is_initialized());

  state.borrow_mut().fail_run = false;
  assert_eq!(engine.process(&model_input_image()).unwrap().len(), 1);
}

#[test]
fn output_shape_must_match_class_count() {
  let (mut engine, state) = ready_engine("shape", Vec::new());
  {
    let mut state = state.borrow_mut();
    state.stride = 10;
    state.output = vec![0.0; 20];
  }

  assert!(matches!(
    engine.process(&model_input_image()),
    Err(EngineError::Inference(RuntimeError::TensorMismatch(_)))
  ));
}

#[test]
fn finalize_releases_and_blocks_further_processing() {
  let (mut engine, state) = ready_engine("finalize", Vec::new());

  engine.finalize().unwrap();
  assert_eq!(state.borrow().finalized, 1);
  assert!(!engine.is_initialized());
  assert!(matches!(
    engine.infer(&model_input_image()),
    Err(EngineError::NotInitialized)
  ));

  drop(engine);
  assert_eq!(state.borrow().finalized, 1);
}
