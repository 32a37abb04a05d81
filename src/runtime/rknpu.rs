// 该文件是 Beifeng （北风） 项目的一部分。
// src/runtime/rknpu.rs - RKNPU 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ::rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use crate::{
  input::AsNhwcFrame,
  runtime::{InferenceRuntime, RuntimeError, RuntimeKind},
  tensor::{InputTensorInfo, OutputTensorInfo},
};

/// RKNN 模型在 NPU 内部完成归一化，输入为 NHWC 排列的 u8 数据
#[derive(Default)]
pub struct RknpuRuntime {
  context: Option<Context>,
  flags: InitFlags,
}

impl RknpuRuntime {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl InferenceRuntime for RknpuRuntime {
  fn kind(&self) -> RuntimeKind {
    RuntimeKind::Rknpu
  }

  fn set_num_threads(&mut self, num_threads: usize) -> Result<(), RuntimeError> {
    if num_threads == 0 {
      return Err(RuntimeError::InvalidThreadCount(num_threads));
    }
    // NPU 核心由驱动调度
    debug!("RKNPU 后端忽略线程数设置: {}", num_threads);
    Ok(())
  }

  fn initialize(
    &mut self,
    model_path: &Path,
    inputs: &[InputTensorInfo],
    outputs: &[OutputTensorInfo],
  ) -> Result<(), RuntimeError> {
    info!("加载模型文件: {}", model_path.display());
    let model_data = std::fs::read(model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, std::mem::take(&mut self.flags))?;

    let num_inputs = context.num_inputs()? as usize;
    let num_outputs = context.num_outputs()? as usize;
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != inputs.len() || num_outputs != outputs.len() {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        inputs.len(),
        outputs.len(),
        num_inputs,
        num_outputs
      );
      return Err(RuntimeError::TensorMismatch(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        inputs.len(),
        outputs.len(),
        num_inputs,
        num_outputs
      )));
    }

    self.context = Some(context);
    info!("模型加载完成");
    Ok(())
  }

  fn preprocess(&mut self, inputs: &[InputTensorInfo]) -> Result<(), RuntimeError> {
    let context = self.context.as_ref().ok_or(RuntimeError::NotInitialized)?;
    let input = inputs
      .first()
      .ok_or_else(|| RuntimeError::TensorMismatch("缺少输入张量".to_string()))?;
    context.set_input(
      0,
      input.frame.as_nhwc(),
      TensorFormat::NHWC,
      TensorType::UInt8,
    )?;
    Ok(())
  }

  fn run(&mut self, outputs: &mut [OutputTensorInfo]) -> Result<(), RuntimeError> {
    let context = self.context.as_ref().ok_or(RuntimeError::NotInitialized)?;
    context.run()?;

    let result = context.get_outputs()?;
    for (index, output) in outputs.iter_mut().enumerate() {
      let data = result.get_f32(index)?;
      output.fill_flat(data);
    }
    Ok(())
  }

  fn finalize(&mut self) {
    if self.context.take().is_some() {
      info!("释放 RKNN 推理上下文");
    }
  }
}
