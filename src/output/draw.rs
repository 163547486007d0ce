// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 在帧上绘制检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, warn};

use super::AnnotatedFrame;
use crate::{
  frame::Frame,
  model::{ClassNameTable, DetectResult, Detection},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const COUNTER_FONT_SIZE: f32 = 24.0;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const COUNTER_POSITION: (i32, i32) = (10, 10);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const COUNTER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const PALETTE_SIZE: usize = 80;

/// 常见系统字体位置
const SYSTEM_FONT_PATHS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("未知的类别 ID: {0}")]
  UnknownClassId(usize),
  #[error("无法加载字体 {path}: {reason}")]
  Font { path: String, reason: String },
}

/// 为检测结果生成标签文本
pub fn label_text(detection: &Detection, classes: &ClassNameTable) -> Result<String, AnnotateError> {
  classes
    .get(detection.class_id)
    .map(|name| format!("{}: {:.2}", name, detection.confidence))
    .ok_or(AnnotateError::UnknownClassId(detection.class_id))
}

/// 检测框绘制器
pub struct Annotator {
  /// 没有字体时只绘制边框
  font: Option<FontArc>,
  label_scale: PxScale,
  counter_scale: PxScale,
  /// 边界框颜色映射
  colors: Vec<Rgb<u8>>,
}

impl Annotator {
  pub fn new(font: Option<FontArc>) -> Self {
    if font.is_none() {
      warn!("未找到可用字体，只绘制检测框");
    }

    // 不同类别使用不同色相
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      counter_scale: PxScale::from(COUNTER_FONT_SIZE),
      colors,
    }
  }

  /// 从 TrueType 字体文件加载
  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, AnnotateError> {
    Ok(Self::new(Some(load_font(path.as_ref())?)))
  }

  /// 依次尝试常见的系统字体
  pub fn with_system_font() -> Self {
    let font = SYSTEM_FONT_PATHS
      .iter()
      .map(Path::new)
      .filter(|path| path.exists())
      .find_map(|path| match load_font(path) {
        Ok(font) => {
          debug!("使用系统字体: {}", path.display());
          Some(font)
        }
        Err(e) => {
          warn!("{}", e);
          None
        }
      });
    Self::new(font)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color_for(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }

  /// 在帧上绘制检测框、标签和目标计数
  ///
  /// 帧的所有权转移到返回的 [`AnnotatedFrame`] 中。
  pub fn annotate(
    &self,
    mut frame: Frame,
    detections: DetectResult,
    classes: &ClassNameTable,
  ) -> AnnotatedFrame {
    let labels = detections
      .items
      .iter()
      .map(|detection| {
        let label = label_text(detection, classes).unwrap_or_else(|e| {
          warn!("{}", e);
          format!("unknown#{}: {:.2}", detection.class_id, detection.confidence)
        });
        self.draw_detection(&mut frame.image, detection, &label);
        label
      })
      .collect::<Vec<_>>()
      .into_boxed_slice();

    if let Some(font) = &self.font {
      let counter = format!("Objects: {}", detections.len());
      draw_text_mut(
        &mut frame.image,
        COUNTER_COLOR,
        COUNTER_POSITION.0,
        COUNTER_POSITION.1,
        self.counter_scale,
        font,
        &counter,
      );
    }

    AnnotatedFrame {
      frame,
      detections,
      labels,
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection, label: &str) {
    let color = self.color_for(detection.class_id);
    let bbox = &detection.bbox;

    let x = bbox.x.round() as i32;
    let y = bbox.y.round() as i32;
    let width = bbox.width.round().max(1.0) as u32;
    let height = bbox.height.round().max(1.0) as u32;

    // 边框加粗为 2 像素，超出画面的部分由 imageproc 裁剪
    for inset in 0..BOX_THICKNESS {
      let shrink = (2 * inset) as u32;
      let rect = Rect::at(x + inset, y + inset).of_size(
        width.saturating_sub(shrink).max(1),
        height.saturating_sub(shrink).max(1),
      );
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let (text_width, text_height) = text_size(self.label_scale, font, label);
    let background_height = text_height as i32 + 2 * LABEL_PADDING;
    let label_y = (y - background_height).max(0);

    let background = Rect::at(x, label_y).of_size(
      (text_width as i32 + 2 * LABEL_PADDING).max(1) as u32,
      background_height.max(1) as u32,
    );
    draw_filled_rect_mut(image, background, color);
    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      x + LABEL_PADDING,
      label_y + LABEL_PADDING,
      self.label_scale,
      font,
      label,
    );
  }
}

fn load_font(path: &Path) -> Result<FontArc, AnnotateError> {
  let font_error = |reason: String| AnnotateError::Font {
    path: path.display().to_string(),
    reason,
  };
  let data = std::fs::read(path).map_err(|e| font_error(e.to_string()))?;
  FontArc::try_from_vec(data).map_err(|e| font_error(e.to_string()))
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h {
    h if h < 60.0 => (c, x, 0.0),
    h if h < 120.0 => (x, c, 0.0),
    h if h < 180.0 => (0.0, c, x),
    h if h < 240.0 => (0.0, x, c),
    h if h < 300.0 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
