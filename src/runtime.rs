// 该文件是 Beifeng （北风） 项目的一部分。
// src/runtime.rs - 推理后端抽象
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{fmt, path::Path, str::FromStr};

use thiserror::Error;

use crate::tensor::{InputTensorInfo, OutputTensorInfo};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxRuntime;

#[cfg(feature = "rknpu")]
mod rknpu;
#[cfg(feature = "rknpu")]
pub use self::rknpu::RknpuRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
  #[error("推理后端未初始化")]
  NotInitialized,
  #[error("不支持的线程数: {0}")]
  InvalidThreadCount(usize),
  #[error("不支持的设备: {0}")]
  UnsupportedDevice(Device),
  #[error("模型文件读取错误: {0}")]
  ModelRead(#[from] std::io::Error),
  #[error("张量不匹配: {0}")]
  TensorMismatch(String),
  #[cfg(feature = "rknpu")]
  #[error("RKNN 错误: {0}")]
  Rknn(::rknpu::Error),
  #[error("推理后端错误: {0}")]
  Backend(String),
}

#[cfg(feature = "rknpu")]
impl From<::rknpu::Error> for RuntimeError {
  fn from(err: ::rknpu::Error) -> Self {
    RuntimeError::Rknn(err)
  }
}

impl RuntimeError {
  pub fn backend(err: impl fmt::Display) -> Self {
    RuntimeError::Backend(err.to_string())
  }
}

/// 推理后端种类，由配置选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
  Onnx,
  Rknpu,
}

impl RuntimeKind {
  /// 该后端使用的模型文件扩展名
  pub fn model_extension(&self) -> &'static str {
    match self {
      RuntimeKind::Onnx => "onnx",
      RuntimeKind::Rknpu => "rknn",
    }
  }
}

impl FromStr for RuntimeKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "onnx" => Ok(RuntimeKind::Onnx),
      "rknpu" | "rknn" => Ok(RuntimeKind::Rknpu),
      _ => Err(format!("未知的推理后端: {}", s)),
    }
  }
}

/// 推理设备
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
  #[default]
  Cpu,
  Cuda(i32),
  TensorRt(i32),
  /// DLA 核心编号，-1 表示不使用 DLA
  Dla(i32),
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
      Device::TensorRt(id) => write!(f, "tensorrt:{}", id),
      Device::Dla(core) => write!(f, "dla:{}", core),
    }
  }
}

impl FromStr for Device {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (name, index) = match s.split_once(':') {
      Some((name, index)) => {
        let index = index
          .parse::<i32>()
          .map_err(|_| format!("设备编号无效: {}", s))?;
        (name, index)
      }
      None => (s, 0),
    };
    match name {
      "cpu" => Ok(Device::Cpu),
      "cuda" => Ok(Device::Cuda(index)),
      "tensorrt" | "trt" => Ok(Device::TensorRt(index)),
      "dla" => Ok(Device::Dla(index)),
      _ => Err(format!("未知的设备: {}", s)),
    }
  }
}

/// 可选能力：支持选择推理设备的后端实现此 trait
pub trait DeviceSelect {
  fn select_device(&mut self, device: Device) -> Result<(), RuntimeError>;
}

/// 推理后端
///
/// 调用顺序为 `set_num_threads` → `initialize` → (`preprocess` → `run`)* → `finalize`。
pub trait InferenceRuntime {
  fn kind(&self) -> RuntimeKind;

  fn set_num_threads(&mut self, num_threads: usize) -> Result<(), RuntimeError>;

  fn initialize(
    &mut self,
    model_path: &Path,
    inputs: &[InputTensorInfo],
    outputs: &[OutputTensorInfo],
  ) -> Result<(), RuntimeError>;

  /// 将输入帧转换为后端所需的张量格式
  fn preprocess(&mut self, inputs: &[InputTensorInfo]) -> Result<(), RuntimeError>;

  /// 执行推理，结果就地写入 `outputs`
  fn run(&mut self, outputs: &mut [OutputTensorInfo]) -> Result<(), RuntimeError>;

  fn finalize(&mut self);

  /// 设备选择能力，不支持的后端返回 `None`
  fn device_select(&mut self) -> Option<&mut dyn DeviceSelect> {
    None
  }
}

/// 创建指定种类的推理后端，未编译该后端时返回 `None`
pub fn create(kind: RuntimeKind) -> Option<Box<dyn InferenceRuntime>> {
  match kind {
    #[cfg(feature = "onnx")]
    RuntimeKind::Onnx => Some(Box::new(OnnxRuntime::default())),
    #[cfg(feature = "rknpu")]
    RuntimeKind::Rknpu => Some(Box::new(RknpuRuntime::default())),
    #[allow(unreachable_patterns)]
    _ => None,
  }
}
