// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 运行时配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::Duration;

use clap::ValueEnum;
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: u32 = 416;
pub const DEFAULT_OBJECTNESS_THRESHOLD: f32 = 0.5;
pub const DEFAULT_CLASS_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.4;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

// darknet 网络的输入尺寸必须是最大步长的整数倍
const INPUT_SIZE_ALIGNMENT: u32 = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("阈值 {name} 超出范围 [0, 1]: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("网络输入尺寸无效: {width}x{height}（必须为 32 的正整数倍）")]
  InvalidInputSize { width: u32, height: u32 },
}

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Backend {
  /// 由推理库自行决定
  Default,
  /// OpenCV 自带实现
  #[default]
  Opencv,
  /// NVIDIA CUDA
  Cuda,
}

/// 推理目标设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Target {
  #[default]
  Cpu,
  Opencl,
  OpenclFp16,
  Cuda,
  CudaFp16,
}

/// 帧缩放到网络输入尺寸的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResizeMode {
  /// 直接拉伸，不保持宽高比
  #[default]
  Stretch,
  /// 保持宽高比，空余部分填充灰色
  Letterbox,
}

/// 网络期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 检测器配置
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 网络输入宽度
  pub input_width: u32,
  /// 网络输入高度
  pub input_height: u32,
  pub resize_mode: ResizeMode,
  pub channel_order: ChannelOrder,
  /// 目标性预过滤阈值
  pub objectness_threshold: f32,
  /// 最大类别分数接受阈值
  pub class_score_threshold: f32,
  /// NMS 分数阈值
  pub nms_score_threshold: f32,
  /// NMS IoU 阈值
  pub nms_iou_threshold: f32,
  pub backend: Backend,
  pub target: Target,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      resize_mode: ResizeMode::default(),
      channel_order: ChannelOrder::default(),
      objectness_threshold: DEFAULT_OBJECTNESS_THRESHOLD,
      class_score_threshold: DEFAULT_CLASS_SCORE_THRESHOLD,
      nms_score_threshold: DEFAULT_NMS_SCORE_THRESHOLD,
      nms_iou_threshold: DEFAULT_NMS_IOU_THRESHOLD,
      backend: Backend::default(),
      target: Target::default(),
    }
  }
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("objectness", self.objectness_threshold),
      ("class-score", self.class_score_threshold),
      ("nms-score", self.nms_score_threshold),
      ("nms-iou", self.nms_iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }

    let aligned = |v: u32| v > 0 && v % INPUT_SIZE_ALIGNMENT == 0;
    if !aligned(self.input_width) || !aligned(self.input_height) {
      return Err(ConfigError::InvalidInputSize {
        width: self.input_width,
        height: self.input_height,
      });
    }

    Ok(())
  }
}

/// 流水线循环配置
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// 读帧失败后的退避时间
  pub retry_delay: Duration,
  /// stop() 等待当前周期结束的最长时间
  pub stop_timeout: Duration,
  /// 连续读帧失败达到该次数时输出一次警告
  pub retry_warn_every: u64,
  /// 流水线线程栈大小，缺省使用系统默认值
  pub worker_stack_size: Option<usize>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      retry_delay: DEFAULT_RETRY_DELAY,
      stop_timeout: DEFAULT_STOP_TIMEOUT,
      retry_warn_every: 30,
      worker_stack_size: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = DetectorConfig::default();
    assert_eq!(config.input_width, 416);
    assert_eq!(config.input_height, 416);
    assert_eq!(config.nms_iou_threshold, 0.4);
    assert_eq!(config.validate(), Ok(()));
  }

  #[test]
  fn rejects_threshold_outside_unit_range() {
    let config = DetectorConfig {
      nms_iou_threshold: 1.5,
      ..Default::default()
    };
    assert_eq!(
      config.validate(),
      Err(ConfigError::ThresholdOutOfRange {
        name: "nms-iou",
        value: 1.5
      })
    );
  }

  #[test]
  fn rejects_unaligned_input_size() {
    let config = DetectorConfig {
      input_width: 420,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidInputSize { width: 420, .. })
    ));

    let config = DetectorConfig {
      input_height: 0,
      ..Default::default()
    };
    assert!(config.validate().is_err());
  }
}
