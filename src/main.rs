// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use args::{CaptureBackend, SourceArgs};
use shanan_live::{
  FromUrl,
  input::{CaptureError, FrameSource},
  model::{ClassNameTable, Detector},
  output::{Annotator, DisplaySink, OutputWrapper},
  task::{PipelineLoop, PipelineState, install_interrupt_handler},
};

const PRESENT_POLL: Duration = Duration::from_millis(100);

#[cfg(feature = "read_image_file")]
fn open_replay(path: &Path, args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  let interval = args
    .replay_fps
    .filter(|fps| *fps > 0.0)
    .map(|fps| Duration::from_secs_f64(1.0 / fps));
  let source = shanan_live::input::ImageFileSource::open(path)?
    .with_looping(args.loop_replay)
    .with_frame_interval(interval);
  Ok(Box::new(source))
}

#[cfg(not(feature = "read_image_file"))]
fn open_replay(path: &Path, _args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  Err(CaptureError::unavailable(
    path.display().to_string(),
    "未启用 read_image_file 特性",
  ))
}

#[cfg(feature = "v4l_camera")]
fn open_v4l2(args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  let camera = shanan_live::input::V4l2Camera::open(args.camera, args.width, args.height)?;
  Ok(Box::new(camera))
}

#[cfg(not(feature = "v4l_camera"))]
fn open_v4l2(args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  Err(CaptureError::unavailable(
    format!("/dev/video{}", args.camera),
    "未启用 v4l_camera 特性",
  ))
}

#[cfg(feature = "opencv_camera")]
fn open_opencv(args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  let camera =
    shanan_live::input::OpenCvCamera::open(args.camera as i32, args.width, args.height)?;
  Ok(Box::new(camera))
}

#[cfg(not(feature = "opencv_camera"))]
fn open_opencv(args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  Err(CaptureError::unavailable(
    format!("camera#{}", args.camera),
    "未启用 opencv_camera 特性",
  ))
}

fn open_source(args: &SourceArgs) -> Result<Box<dyn FrameSource>, CaptureError> {
  if let Some(path) = &args.replay {
    return open_replay(path, args);
  }

  match args.capture {
    CaptureBackend::V4l2 => open_v4l2(args),
    CaptureBackend::Opencv => open_opencv(args),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("网络配置: {}", args.config.display());
  info!("权重文件: {}", args.weights.display());
  info!("输出路径: {}", args.output);

  let detector_config = args.detector_config();
  detector_config.validate()?;

  info!("正在加载模型...");
  let detector = Detector::load(&args.config, &args.weights, detector_config)
    .inspect_err(|e| error!("{}", e))?;

  let classes = match &args.names {
    Some(path) => ClassNameTable::load(path)?,
    None => ClassNameTable::coco(),
  };
  let annotator = match &args.font {
    Some(path) => Annotator::from_font_file(path)?,
    None => Annotator::with_system_font(),
  };
  let mut output = OutputWrapper::from_url(&args.output)?;

  let quit = Arc::new(AtomicBool::new(false));
  install_interrupt_handler(quit.clone())?;

  let source_args = args.source_args();
  let mut pipeline = PipelineLoop::new(
    move || open_source(&source_args),
    detector,
    annotator,
    classes,
    args.pipeline_config(),
  );
  pipeline.start().inspect_err(|e| error!("{}", e))?;
  let mailbox = pipeline.mailbox();

  let mut presented = 0u64;
  while !quit.load(Ordering::SeqCst) {
    match mailbox.take_timeout(PRESENT_POLL) {
      Some(frame) => {
        if let Err(e) = output.present(&frame) {
          warn!("显示第 {} 帧失败: {}", frame.frame.index, e);
        }
        presented += 1;
        if args.frame_number > 0 && presented >= args.frame_number {
          warn!("已达到指定帧数 {}, 退出", args.frame_number);
          break;
        }
      }
      None if pipeline.state() == PipelineState::Stopped => {
        info!("流水线已结束");
        break;
      }
      None => {}
    }
  }

  if let Err(e) = pipeline.stop() {
    warn!("停止流水线失败: {}", e);
  }
  output.finish()?;

  info!("任务完成: {:?}", pipeline.stats());
  Ok(())
}
