// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧与 NCHW 张量定义
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

use image::{Rgb, RgbImage, imageops};

use crate::config::{ChannelOrder, ResizeMode};

const RGB_CHANNELS: usize = 3;
// letterbox 填充值，与 darknet 训练时一致
const LETTERBOX_FILL: u8 = 127;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// NCHW 排列的浮点张量，数值范围 [0, 1]
#[derive(Debug, Clone)]
pub struct Tensor {
  shape: [usize; 4],
  data: Box<[f32]>,
}

impl Tensor {
  /// 将帧缩放到网络输入尺寸并转换为 NCHW 张量
  ///
  /// 返回的 [`Letterbox`] 描述了缩放时的几何变换，用于把网络输出还原到帧坐标。
  pub fn from_image(
    image: &RgbImage,
    input_width: u32,
    input_height: u32,
    resize_mode: ResizeMode,
    channel_order: ChannelOrder,
  ) -> (Self, Letterbox) {
    let (resized, letterbox) = match resize_mode {
      ResizeMode::Stretch => (
        imageops::resize(
          image,
          input_width,
          input_height,
          imageops::FilterType::Triangle,
        ),
        Letterbox::identity(),
      ),
      ResizeMode::Letterbox => letterbox_image(image, input_width, input_height),
    };

    let width = input_width as usize;
    let height = input_height as usize;
    let plane = width * height;
    let mut data = vec![0f32; RGB_CHANNELS * plane].into_boxed_slice();

    let order: [usize; RGB_CHANNELS] = match channel_order {
      ChannelOrder::Rgb => [0, 1, 2],
      ChannelOrder::Bgr => [2, 1, 0],
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = (y as usize) * width + (x as usize);
      for (c, &src) in order.iter().enumerate() {
        data[c * plane + idx] = pixel[src] as f32 / 255.0;
      }
    }

    let tensor = Self {
      shape: [1, RGB_CHANNELS, height, width],
      data,
    };
    (tensor, letterbox)
  }

  /// [batch, channels, height, width]
  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn width(&self) -> usize {
    self.shape[3]
  }

  pub fn height(&self) -> usize {
    self.shape[2]
  }

  pub fn channels(&self) -> usize {
    self.shape[1]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

fn letterbox_image(image: &RgbImage, input_width: u32, input_height: u32) -> (RgbImage, Letterbox) {
  let (src_w, src_h) = image.dimensions();
  let scale = (input_width as f32 / src_w as f32).min(input_height as f32 / src_h as f32);
  let content_w = ((src_w as f32 * scale).round() as u32).clamp(1, input_width);
  let content_h = ((src_h as f32 * scale).round() as u32).clamp(1, input_height);
  let pad_x = (input_width - content_w) / 2;
  let pad_y = (input_height - content_h) / 2;

  let resized = imageops::resize(image, content_w, content_h, imageops::FilterType::Triangle);
  let mut canvas = RgbImage::from_pixel(input_width, input_height, Rgb([LETTERBOX_FILL; 3]));
  imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

  let letterbox = Letterbox {
    offset_x: pad_x as f32 / input_width as f32,
    offset_y: pad_y as f32 / input_height as f32,
    scale_x: input_width as f32 / content_w as f32,
    scale_y: input_height as f32 / content_h as f32,
  };
  (canvas, letterbox)
}

/// 网络输入中有效图像区域的位置（归一化坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  offset_x: f32,
  offset_y: f32,
  scale_x: f32,
  scale_y: f32,
}

impl Letterbox {
  pub fn identity() -> Self {
    Self {
      offset_x: 0.0,
      offset_y: 0.0,
      scale_x: 1.0,
      scale_y: 1.0,
    }
  }

  pub fn is_identity(&self) -> bool {
    *self == Self::identity()
  }

  /// 把 `[cx, cy, w, h, ...]` 从网络输入坐标还原为帧归一化坐标
  pub fn restore_row(&self, row: &mut [f32]) {
    if row.len() < 4 {
      return;
    }
    row[0] = (row[0] - self.offset_x) * self.scale_x;
    row[1] = (row[1] - self.offset_y) * self.scale_y;
    row[2] *= self.scale_x;
    row[3] *= self.scale_y;
  }
}
