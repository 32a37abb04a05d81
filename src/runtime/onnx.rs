// 该文件是 Beifeng （北风） 项目的一部分。
// src/runtime/onnx.rs - ONNX Runtime 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
  session::{Session, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use tracing::{debug, info};

use crate::{
  runtime::{Device, DeviceSelect, InferenceRuntime, RuntimeError, RuntimeKind},
  tensor::{InputTensorInfo, OutputTensorInfo, TensorLayout},
};

#[derive(Default)]
pub struct OnnxRuntime {
  session: Option<Session>,
  num_threads: usize,
  device: Device,
  input_name: String,
  input_shape: [usize; 4],
  input_buffer: Vec<f32>,
}

impl OnnxRuntime {
  fn build_session(&self, model_path: &Path) -> Result<Session, RuntimeError> {
    let builder = Session::builder()
      .map_err(RuntimeError::backend)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(RuntimeError::backend)?;
    let builder = if self.num_threads > 0 {
      builder
        .with_intra_threads(self.num_threads)
        .map_err(RuntimeError::backend)?
    } else {
      builder
    };

    let builder = match self.device {
      Device::Cpu => builder
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .map_err(RuntimeError::backend)?,
      Device::Cuda(id) => builder
        .with_execution_providers([
          CUDAExecutionProvider::default().with_device_id(id).build(),
          CPUExecutionProvider::default().build(),
        ])
        .map_err(RuntimeError::backend)?,
      Device::TensorRt(id) => builder
        .with_execution_providers([
          TensorRTExecutionProvider::default()
            .with_device_id(id)
            .build(),
          CUDAExecutionProvider::default().with_device_id(id).build(),
          CPUExecutionProvider::default().build(),
        ])
        .map_err(RuntimeError::backend)?,
      Device::Dla(_) => return Err(RuntimeError::UnsupportedDevice(self.device)),
    };

    builder
      .commit_from_file(model_path)
      .map_err(RuntimeError::backend)
  }
}

impl DeviceSelect for OnnxRuntime {
  fn select_device(&mut self, device: Device) -> Result<(), RuntimeError> {
    if matches!(device, Device::Dla(_)) {
      return Err(RuntimeError::UnsupportedDevice(device));
    }
    debug!("ONNX Runtime 设备: {}", device);
    self.device = device;
    Ok(())
  }
}

impl InferenceRuntime for OnnxRuntime {
  fn kind(&self) -> RuntimeKind {
    RuntimeKind::Onnx
  }

  fn set_num_threads(&mut self, num_threads: usize) -> Result<(), RuntimeError> {
    if num_threads == 0 {
      return Err(RuntimeError::InvalidThreadCount(num_threads));
    }
    self.num_threads = num_threads;
    Ok(())
  }

  fn initialize(
    &mut self,
    model_path: &Path,
    inputs: &[InputTensorInfo],
    outputs: &[OutputTensorInfo],
  ) -> Result<(), RuntimeError> {
    let [input] = inputs else {
      return Err(RuntimeError::TensorMismatch(format!(
        "ONNX 后端仅支持单输入, 实际为 {}",
        inputs.len()
      )));
    };
    if input.layout != TensorLayout::Nchw {
      return Err(RuntimeError::TensorMismatch(
        "ONNX 后端要求 NCHW 输入".to_string(),
      ));
    }

    info!("加载 ONNX 模型: {}", model_path.display());
    let session = self.build_session(model_path)?;

    let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    debug!("模型输入: {:?}", input_names);
    debug!("模型输出: {:?}", output_names);

    if !input_names.contains(&input.name.as_str()) {
      return Err(RuntimeError::TensorMismatch(format!(
        "模型中不存在输入 {}",
        input.name
      )));
    }
    for output in outputs {
      if !output_names.contains(&output.name.as_str()) {
        return Err(RuntimeError::TensorMismatch(format!(
          "模型中不存在输出 {}",
          output.name
        )));
      }
    }

    self.input_name = input.name.clone();
    self.input_shape = input.dims;
    self.session = Some(session);
    info!("ONNX 模型加载完成");
    Ok(())
  }

  fn preprocess(&mut self, inputs: &[InputTensorInfo]) -> Result<(), RuntimeError> {
    let input = inputs
      .first()
      .ok_or_else(|| RuntimeError::TensorMismatch("缺少输入张量".to_string()))?;
    input
      .frame
      .write_nchw_f32(&input.normalize, &mut self.input_buffer);
    Ok(())
  }

  fn run(&mut self, outputs: &mut [OutputTensorInfo]) -> Result<(), RuntimeError> {
    let session = self.session.as_mut().ok_or(RuntimeError::NotInitialized)?;

    // 直接引用复用的输入缓冲
    let tensor = TensorRef::from_array_view((self.input_shape, self.input_buffer.as_slice()))
      .map_err(RuntimeError::backend)?;
    let result = session
      .run(ort::inputs![self.input_name.as_str() => tensor])
      .map_err(RuntimeError::backend)?;

    for output in outputs.iter_mut() {
      let (shape, data) = result[output.name.as_str()]
        .try_extract_tensor::<f32>()
        .map_err(RuntimeError::backend)?;
      let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
      output.fill(&dims, data);
    }
    Ok(())
  }

  fn finalize(&mut self) {
    if self.session.take().is_some() {
      info!("释放 ONNX 会话");
    }
  }

  fn device_select(&mut self) -> Option<&mut dyn DeviceSelect> {
    Some(self)
  }
}
