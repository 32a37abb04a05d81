// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 任务驱动
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  model::{DetectionResult, Model},
  output::Render,
};

/// 从输入取帧，经模型推理后交给输出
pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: &mut M, output: &O) -> Result<(), Self::Error>;
}

fn log_stages(index: usize, result: &DetectionResult) {
  debug!(
    "({}) 检测到 {} 个目标，前处理 {:.2} ms / 推理 {:.2} ms / 后处理 {:.2} ms",
    index,
    result.len(),
    result.time_pre_process,
    result.time_inference,
    result.time_post_process
  );
}

/// 处理第一帧后退出
pub struct OneShotTask;

impl<
  F,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectionResult, Error = ME>,
  O: Render<F, DetectionResult, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &mut M, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，检测到 {} 个目标，耗时: {:.2?}", result.len(), now.elapsed());
    log_stages(0, &result);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理，用于测速
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub fn new(times: usize) -> Self {
    Self { times: times.max(1) }
  }
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self::new(1000)
  }
}

impl<
  F,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectionResult, Error = ME>,
  O: Render<F, DetectionResult, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &mut M, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      log_stages(i, &result);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    // 前两次包含预热开销，样本足够时不计入平均
    let warmup = if times.len() > 2 { 2 } else { 0 };
    let samples = &times[warmup..];
    warn!(
      "平均推理时间: {:.2?}",
      samples.iter().sum::<Duration>() / samples.len() as u32
    );

    Ok(())
  }
}

/// 逐帧处理直到输入耗尽、达到帧数或收到中断信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = DetectionResult, Error = ME>,
  O: Render<F, DetectionResult, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &mut M, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      log_stages(frame_index, &result);
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;
  use crate::transform::CropRegion;

  #[derive(Debug, thiserror::Error)]
  #[error("stub")]
  struct StubError;

  struct CountingModel {
    calls: usize,
  }

  impl Model for CountingModel {
    type Input = u32;
    type Output = DetectionResult;
    type Error = StubError;

    fn infer(&mut self, _input: &u32) -> Result<DetectionResult, StubError> {
      self.calls += 1;
      Ok(DetectionResult {
        bbox_list: Vec::new(),
        crop: CropRegion::whole(1, 1),
        time_pre_process: 0.0,
        time_inference: 0.0,
        time_post_process: 0.0,
      })
    }
  }

  #[derive(Default)]
  struct RecordingOutput {
    frames: RefCell<Vec<u32>>,
  }

  impl Render<u32, DetectionResult> for RecordingOutput {
    type Error = StubError;

    fn render_result(&self, frame: &u32, _result: &DetectionResult) -> Result<(), StubError> {
      self.frames.borrow_mut().push(*frame);
      Ok(())
    }
  }

  #[test]
  fn one_shot_processes_first_frame_only() {
    let mut model = CountingModel { calls: 0 };
    let output = RecordingOutput::default();
    OneShotTask
      .run_task(vec![7u32, 8, 9].into_iter(), &mut model, &output)
      .unwrap();
    assert_eq!(model.calls, 1);
    assert_eq!(*output.frames.borrow(), vec![7]);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let mut model = CountingModel { calls: 0 };
    let output = RecordingOutput::default();
    let result = OneShotTask.run_task(Vec::<u32>::new().into_iter(), &mut model, &output);
    assert!(result.is_err());
  }

  #[test]
  fn repeat_shot_reuses_the_same_frame() {
    let mut model = CountingModel { calls: 0 };
    let output = RecordingOutput::default();
    RepeatShotTask::new(5)
      .run_task(vec![3u32, 4].into_iter(), &mut model, &output)
      .unwrap();
    assert_eq!(model.calls, 5);
    assert_eq!(*output.frames.borrow(), vec![3; 5]);
  }

  // 中断处理函数每个进程只能注册一次，ContinuousTask 仅在此测试中运行
  #[test]
  fn continuous_stops_at_frame_limit() {
    let mut model = CountingModel { calls: 0 };
    let output = RecordingOutput::default();
    ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(vec![1u32, 2, 3, 4].into_iter(), &mut model, &output)
      .unwrap();
    assert_eq!(model.calls, 2);
    assert_eq!(*output.frames.borrow(), vec![1, 2]);
  }
}
