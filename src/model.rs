// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{config::DetectorConfig, frame::Tensor};

mod decode;
mod labels;
mod nms;

pub use self::decode::Decoder;
pub use self::labels::ClassNameTable;
pub use self::nms::Suppressor;

#[cfg(feature = "darknet")]
mod darknet;
#[cfg(feature = "darknet")]
pub use self::darknet::DarknetNetwork;

/// 每行的固定前缀：cx, cy, w, h, objectness
pub const ROW_PREFIX: usize = 5;
pub const OBJECTNESS_OFFSET: usize = 4;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误 ({path}): {reason}")]
  ModelLoad { path: String, reason: String },
  #[error("检测失败: {0}")]
  Detection(String),
  #[error("网络输出格式错误: {0}")]
  MalformedOutput(String),
}

impl ModelError {
  pub fn load(path: impl Into<String>, reason: impl ToString) -> Self {
    ModelError::ModelLoad {
      path: path.into(),
      reason: reason.to_string(),
    }
  }
}

/// 网络的一个原始输出：rows 行，每行 `[cx, cy, w, h, objectness, class_0..]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  cols: usize,
  data: Vec<f32>,
}

impl RawOutput {
  pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, ModelError> {
    if cols < ROW_PREFIX {
      return Err(ModelError::MalformedOutput(format!(
        "每行至少需要 {} 列，实际为 {}",
        ROW_PREFIX, cols
      )));
    }
    if rows * cols != data.len() {
      return Err(ModelError::MalformedOutput(format!(
        "形状 {}x{} 与数据长度 {} 不一致",
        rows,
        cols,
        data.len()
      )));
    }
    Ok(Self { cols, data })
  }

  /// 由若干行构造，主要用于测试与回放
  pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, ModelError> {
    let cols = rows.first().map(Vec::len).unwrap_or(ROW_PREFIX);
    if rows.iter().any(|row| row.len() != cols) {
      return Err(ModelError::MalformedOutput("各行长度不一致".to_string()));
    }
    Self::new(rows.len(), cols, rows.concat())
  }

  pub fn num_rows(&self) -> usize {
    self.data.len() / self.cols
  }

  pub fn num_cols(&self) -> usize {
    self.cols
  }

  pub fn num_classes(&self) -> usize {
    self.cols - ROW_PREFIX
  }

  pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
    self.data.chunks_exact(self.cols)
  }

  pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
    self.data.chunks_exact_mut(self.cols)
  }
}

/// 推理库提供的可调用推理对象
///
/// 计算图不可重入，`forward` 需要独占访问。
pub trait Network: Send {
  fn forward(&mut self, input: &Tensor) -> Result<Vec<RawOutput>, ModelError>;
}

impl<N: Network + ?Sized> Network for Box<N> {
  fn forward(&mut self, input: &Tensor) -> Result<Vec<RawOutput>, ModelError> {
    (**self).forward(input)
  }
}

/// 帧像素坐标下的边界框（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = (self.x + self.width).min(other.x + other.width);
    let y2 = (self.y + self.height).min(other.y + other.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 解码后、NMS 之前的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

/// NMS 之后保留的检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl From<Candidate> for Detection {
  fn from(candidate: Candidate) -> Self {
    Self {
      class_id: candidate.class_id,
      confidence: candidate.confidence,
      bbox: candidate.bbox,
    }
  }
}

/// 一帧的检测结果，按置信度降序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 目标检测器：持有已加载的网络，负责预处理与推理
pub struct Detector<N> {
  network: N,
  config: DetectorConfig,
}

impl<N: Network> Detector<N> {
  pub fn new(network: N, config: DetectorConfig) -> Self {
    Self { network, config }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 运行推理，返回坐标已归一化到整帧的原始输出
  ///
  /// 输入张量只在本次调用内存在。
  pub fn infer(&mut self, image: &RgbImage) -> Result<Vec<RawOutput>, ModelError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(ModelError::Detection("空帧".to_string()));
    }

    let now = Instant::now();
    let (tensor, letterbox) = Tensor::from_image(
      image,
      self.config.input_width,
      self.config.input_height,
      self.config.resize_mode,
      self.config.channel_order,
    );
    let preprocess = now.elapsed();

    let mut outputs = self.network.forward(&tensor)?;
    drop(tensor);

    if !letterbox.is_identity() {
      for output in outputs.iter_mut() {
        output.rows_mut().for_each(|row| letterbox.restore_row(row));
      }
    }

    debug!(
      "推理完成，预处理 {:.2?} / 总计 {:.2?}, 输出 {} 个张量",
      preprocess,
      now.elapsed(),
      outputs.len()
    );
    Ok(outputs)
  }
}

#[cfg(feature = "darknet")]
impl Detector<DarknetNetwork> {
  /// 加载 darknet 配置与权重
  pub fn load(
    config_path: impl AsRef<std::path::Path>,
    weights_path: impl AsRef<std::path::Path>,
    config: DetectorConfig,
  ) -> Result<Self, ModelError> {
    let network = DarknetNetwork::load(
      config_path.as_ref(),
      weights_path.as_ref(),
      config.backend,
      config.target,
    )?;
    Ok(Self::new(network, config))
  }
}
