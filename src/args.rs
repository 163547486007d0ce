// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use url::Url;

use shanan_live::config::{
  Backend, ChannelOrder, DEFAULT_CLASS_SCORE_THRESHOLD, DEFAULT_INPUT_SIZE,
  DEFAULT_NMS_IOU_THRESHOLD, DEFAULT_NMS_SCORE_THRESHOLD, DEFAULT_OBJECTNESS_THRESHOLD,
  DetectorConfig, PipelineConfig, ResizeMode, Target,
};

/// 摄像头采集方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CaptureBackend {
  /// 直接通过 V4L2 访问 /dev/videoN（需要 v4l_camera 特性）
  V4l2,
  /// 通过 OpenCV videoio（需要 opencv_camera 特性）
  Opencv,
}

impl Default for CaptureBackend {
  fn default() -> Self {
    if cfg!(feature = "v4l_camera") {
      CaptureBackend::V4l2
    } else {
      CaptureBackend::Opencv
    }
  }
}

/// 打开输入源所需的参数，流水线每次启动时使用
#[derive(Debug, Clone)]
pub struct SourceArgs {
  pub camera: usize,
  pub capture: CaptureBackend,
  pub width: u32,
  pub height: u32,
  pub replay: Option<PathBuf>,
  pub replay_fps: Option<f64>,
  pub loop_replay: bool,
}

/// Shanan 实时检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// darknet 网络配置文件 (.cfg)
  #[arg(long, value_name = "FILE")]
  pub config: PathBuf,

  /// darknet 权重文件 (.weights)
  #[arg(long, value_name = "FILE")]
  pub weights: PathBuf,

  /// 类别名称文件，每行一个；缺省使用内置 COCO 类别
  #[arg(long, value_name = "FILE")]
  pub names: Option<PathBuf>,

  /// 摄像头索引
  #[arg(long, default_value_t = 0, value_name = "INDEX")]
  pub camera: usize,

  /// 摄像头采集方式
  #[arg(long, value_enum, default_value_t = CaptureBackend::default())]
  pub capture: CaptureBackend,

  /// 采集宽度
  #[arg(long, default_value_t = 640)]
  pub width: u32,

  /// 采集高度
  #[arg(long, default_value_t = 480)]
  pub height: u32,

  /// 用图片文件或图片目录代替摄像头
  #[arg(long, value_name = "PATH")]
  pub replay: Option<PathBuf>,

  /// 回放帧率，缺省不限速
  #[arg(long, value_name = "FPS", requires = "replay")]
  pub replay_fps: Option<f64>,

  /// 回放结束后从头开始
  #[arg(long, requires = "replay")]
  pub loop_replay: bool,

  /// 显示输出
  /// 支持格式:
  /// - null:
  /// - image:///path/latest.png
  #[arg(long, default_value = "null:", value_name = "OUTPUT")]
  pub output: Url,

  /// 推理后端
  #[arg(long, value_enum, default_value_t = Backend::default())]
  pub backend: Backend,

  /// 推理目标设备
  #[arg(long, value_enum, default_value_t = Target::default())]
  pub target: Target,

  /// 网络输入尺寸（宽高相同，须为 32 的倍数）
  #[arg(long, default_value_t = DEFAULT_INPUT_SIZE, value_name = "PIXELS")]
  pub input_size: u32,

  #[arg(long, value_enum, default_value_t = ResizeMode::default())]
  pub resize_mode: ResizeMode,

  #[arg(long, value_enum, default_value_t = ChannelOrder::default())]
  pub channel_order: ChannelOrder,

  /// 目标性阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_OBJECTNESS_THRESHOLD, value_name = "THRESHOLD")]
  pub objectness: f32,

  /// 类别分数阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CLASS_SCORE_THRESHOLD, value_name = "THRESHOLD")]
  pub class_score: f32,

  /// NMS 分数阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_SCORE_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_score: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_iou: f32,

  /// 标签字体 (TrueType)，缺省查找系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 显示指定帧数后退出，0 表示不限制
  #[arg(long, default_value_t = 0, value_name = "FRAME_NUMBER")]
  pub frame_number: u64,

  /// 读帧失败后的退避时间（毫秒）
  #[arg(long, default_value_t = 10, value_name = "MS")]
  pub retry_delay_ms: u64,

  /// 停止时等待当前周期结束的最长时间（毫秒）
  #[arg(long, default_value_t = 1000, value_name = "MS")]
  pub stop_timeout_ms: u64,
}

impl Args {
  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      input_width: self.input_size,
      input_height: self.input_size,
      resize_mode: self.resize_mode,
      channel_order: self.channel_order,
      objectness_threshold: self.objectness,
      class_score_threshold: self.class_score,
      nms_score_threshold: self.nms_score,
      nms_iou_threshold: self.nms_iou,
      backend: self.backend,
      target: self.target,
    }
  }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      retry_delay: Duration::from_millis(self.retry_delay_ms),
      stop_timeout: Duration::from_millis(self.stop_timeout_ms),
      ..Default::default()
    }
  }

  pub fn source_args(&self) -> SourceArgs {
    SourceArgs {
      camera: self.camera,
      capture: self.capture,
      width: self.width,
      height: self.height,
      replay: self.replay.clone(),
      replay_fps: self.replay_fps,
      loop_replay: self.loop_replay,
    }
  }
}
