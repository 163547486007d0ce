// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 原始输出解码
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

use super::{BoundingBox, Candidate, OBJECTNESS_OFFSET, ROW_PREFIX, RawOutput};
use crate::config::{DEFAULT_CLASS_SCORE_THRESHOLD, DEFAULT_OBJECTNESS_THRESHOLD, DetectorConfig};

/// 把网络原始输出行解码为帧像素坐标下的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoder {
  objectness_threshold: f32,
  class_score_threshold: f32,
}

impl Default for Decoder {
  fn default() -> Self {
    Self::new(DEFAULT_OBJECTNESS_THRESHOLD, DEFAULT_CLASS_SCORE_THRESHOLD)
  }
}

impl Decoder {
  pub fn new(objectness_threshold: f32, class_score_threshold: f32) -> Self {
    Self {
      objectness_threshold,
      class_score_threshold,
    }
  }

  pub fn from_config(config: &DetectorConfig) -> Self {
    Self::new(config.objectness_threshold, config.class_score_threshold)
  }

  /// 解码所有输出张量，每行至多产生一个候选框
  pub fn decode(&self, outputs: &[RawOutput], frame_width: u32, frame_height: u32) -> Vec<Candidate> {
    let width = frame_width as f32;
    let height = frame_height as f32;

    outputs
      .iter()
      .flat_map(|output| output.rows())
      .filter_map(|row| self.decode_row(row, width, height))
      .collect()
  }

  fn decode_row(&self, row: &[f32], frame_width: f32, frame_height: f32) -> Option<Candidate> {
    let objectness = row[OBJECTNESS_OFFSET];
    // 目标性不足的行不扫描类别分数；NaN 同样被拒绝
    if !(objectness >= self.objectness_threshold) {
      return None;
    }

    // 并列时取最小的类别索引
    let (class_id, confidence) = row[ROW_PREFIX..]
      .iter()
      .copied()
      .enumerate()
      .fold(None, |best: Option<(usize, f32)>, (id, score)| match best {
        Some((_, max)) if !(score > max) => best,
        _ if score.is_nan() => best,
        _ => Some((id, score)),
      })?;

    if !(confidence > self.class_score_threshold) {
      return None;
    }

    let (x, width) = clip_origin(row[0] * frame_width, row[2] * frame_width);
    let (y, height) = clip_origin(row[1] * frame_height, row[3] * frame_height);

    Some(Candidate {
      class_id,
      confidence,
      bbox: BoundingBox {
        x,
        y,
        width,
        height,
      },
    })
  }
}

/// 中心坐标转为起点，越过 0 的部分被裁掉，远端边缘保持不变
fn clip_origin(center: f32, size: f32) -> (f32, f32) {
  let start = center - size / 2.0;
  let end = start + size;
  let clipped = start.max(0.0);
  (clipped, (end - clipped).max(0.0))
}
