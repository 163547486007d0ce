// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use super::{Candidate, Detection};
use crate::config::{DEFAULT_NMS_IOU_THRESHOLD, DEFAULT_NMS_SCORE_THRESHOLD, DetectorConfig};

/// 贪心非极大值抑制，不区分类别
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppressor {
  score_threshold: f32,
  iou_threshold: f32,
}

impl Default for Suppressor {
  fn default() -> Self {
    Self::new(DEFAULT_NMS_SCORE_THRESHOLD, DEFAULT_NMS_IOU_THRESHOLD)
  }
}

impl Suppressor {
  pub fn new(score_threshold: f32, iou_threshold: f32) -> Self {
    Self {
      score_threshold,
      iou_threshold,
    }
  }

  pub fn from_config(config: &DetectorConfig) -> Self {
    Self::new(config.nms_score_threshold, config.nms_iou_threshold)
  }

  /// 输出按置信度降序，置信度相同时保持输入顺序
  pub fn suppress(&self, candidates: Vec<Candidate>) -> Vec<Detection> {
    let mut remaining = candidates
      .into_iter()
      .filter(|c| c.confidence > self.score_threshold)
      .collect::<Vec<_>>();

    // sort_by 是稳定排序
    remaining.sort_by(|a, b| {
      b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(remaining.len());
    for candidate in remaining {
      let overlapped = kept
        .iter()
        .any(|best| best.bbox.iou(&candidate.bbox) >= self.iou_threshold);
      if !overlapped {
        kept.push(candidate.into());
      }
    }

    kept
  }
}
