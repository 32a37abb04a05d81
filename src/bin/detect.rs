// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/detect.rs - 检测命令行工具
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;
use url::Url;

use beifeng::{
  FromUrl,
  input::InputWrapper,
  model::EngineBuilder,
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, RepeatShotTask, Task},
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TaskKind {
  /// 只处理第一帧
  Oneshot,
  /// 对第一帧重复推理并统计平均耗时
  Repeat,
  /// 逐帧处理全部输入
  Continuous,
}

/// Beifeng 检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// 模型目录，方案选择推理后端，例如 onnx:///opt/models?threads=4
  #[arg(long, value_name = "MODEL")]
  model: Url,
  /// 输入来源: image:///a.jpg 或 folder:///images
  #[arg(long, value_name = "SOURCE")]
  input: Url,
  /// 输出: image:///out.png, json:///out.json, folder:///records 或 null:
  #[arg(long, value_name = "OUTPUT")]
  output: Url,
  #[arg(long, value_enum, default_value = "continuous")]
  task: TaskKind,
  /// repeat 任务的推理次数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  repeat: usize,
  /// continuous 任务的最大帧数
  #[arg(long, value_name = "COUNT")]
  frames: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut engine = EngineBuilder::from_url(&args.model)?.build()?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  match args.task {
    TaskKind::Oneshot => OneShotTask.run_task(input, &mut engine, &output)?,
    TaskKind::Repeat => RepeatShotTask::new(args.repeat).run_task(input, &mut engine, &output)?,
    TaskKind::Continuous => ContinuousTask::default()
      .with_frame_number(args.frames)
      .run_task(input, &mut engine, &output)?,
  }

  engine.finalize()?;
  Ok(())
}
