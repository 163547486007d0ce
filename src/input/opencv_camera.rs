// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/opencv_camera.rs - OpenCV 摄像头输入源
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
use opencv::{
  core::Mat,
  imgproc,
  prelude::*,
  videoio::{self, VideoCapture},
};
use tracing::{info, warn};

use super::{CaptureError, FrameSource};
use crate::frame::Frame;

/// 通过 OpenCV videoio 打开的摄像头
pub struct OpenCvCamera {
  index: i32,
  capture: Option<VideoCapture>,
  raw: Mat,
  rgb: Mat,
  frame_index: u64,
  start_time: Instant,
}

impl OpenCvCamera {
  /// 按索引打开摄像头，依次尝试 V4L2 与自动选择的后端
  pub fn open(index: i32, width: u32, height: u32) -> Result<Self, CaptureError> {
    let device = format!("camera#{}", index);

    let mut capture = None;
    for backend in [videoio::CAP_V4L2, videoio::CAP_ANY] {
      match VideoCapture::new(index, backend) {
        Ok(cap) if cap.is_opened().unwrap_or(false) => {
          capture = Some(cap);
          break;
        }
        Ok(_) => warn!("{} 无法通过后端 {} 打开", device, backend),
        Err(e) => warn!("{} 打开失败（后端 {}）: {}", device, backend, e),
      }
    }
    let mut capture = capture.ok_or_else(|| CaptureError::unavailable(&device, "设备未打开"))?;

    for (property, name, value) in [
      (videoio::CAP_PROP_FRAME_WIDTH, "宽度", width),
      (videoio::CAP_PROP_FRAME_HEIGHT, "高度", height),
    ] {
      let result = capture.set(property, value as f64);
      check_property(&device, name, value, result);
    }
    info!("摄像头已打开: {}", device);

    Ok(Self {
      index,
      capture: Some(capture),
      raw: Mat::default(),
      rgb: Mat::default(),
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

/// 驱动拒绝或设置失败时只记录警告，继续使用驱动的默认值
fn check_property(device: &str, name: &str, value: u32, result: opencv::Result<bool>) -> bool {
  match result {
    Ok(true) => true,
    Ok(false) => {
      warn!("{} 不接受采集{} {}，使用驱动默认值", device, name, value);
      false
    }
    Err(e) => {
      warn!("{} 设置采集{} {} 失败: {}", device, name, value, e);
      false
    }
  }
}

fn transient(err: opencv::Error) -> CaptureError {
  CaptureError::TransientRead(err.to_string())
}

impl FrameSource for OpenCvCamera {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    let capture = self.capture.as_mut().ok_or(CaptureError::EndOfStream)?;

    let grabbed = capture.read(&mut self.raw).map_err(transient)?;
    if !grabbed || self.raw.empty() {
      return Err(CaptureError::TransientRead("驱动未返回帧".to_string()));
    }

    imgproc::cvt_color_def(&self.raw, &mut self.rgb, imgproc::COLOR_BGR2RGB).map_err(transient)?;

    let width = self.rgb.cols() as u32;
    let height = self.rgb.rows() as u32;
    let data = self.rgb.data_bytes().map_err(transient)?.to_vec();
    let image = RgbImage::from_raw(width, height, data)
      .ok_or_else(|| CaptureError::TransientRead("帧数据长度不足".to_string()))?;

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }

  fn close(&mut self) {
    if let Some(mut capture) = self.capture.take() {
      if let Err(e) = capture.release() {
        warn!("释放 camera#{} 失败: {}", self.index, e);
      }
      info!("摄像头已关闭: camera#{}", self.index);
    }
  }

  fn describe(&self) -> String {
    format!("opencv:camera#{}", self.index)
  }
}

impl Drop for OpenCvCamera {
  fn drop(&mut self) {
    self.close();
  }
}
