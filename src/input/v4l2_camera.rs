// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头输入源
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

use std::{io, time::Duration, time::Instant};

use image::RgbImage;
use tracing::{debug, info};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{CaptureError, FrameSource};
use crate::frame::Frame;

const CAPTURE_BUFFERS: u32 = 4;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
// 设备被拔出
const ENODEV: i32 = 19;

/// 驱动最终协商出的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
  Rgb3,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"MJPG" => Some(PixelFormat::Mjpg),
      b"RGB3" => Some(PixelFormat::Rgb3),
      _ => None,
    }
  }
}

/// V4L2 摄像头输入源
///
/// mmap 流只持有设备句柄的引用计数，不借用 `Device`，因此两者可以放在同一个结构体中；
/// 关闭时先释放流再释放设备。
pub struct V4l2Camera {
  index: usize,
  device: Option<Device>,
  stream: Option<Stream<'static>>,
  pixel_format: PixelFormat,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl V4l2Camera {
  /// 打开 `/dev/video{index}`，请求 `width`x`height` 的 YUYV 格式
  pub fn open(index: usize, width: u32, height: u32) -> Result<Self, CaptureError> {
    let device_name = format!("/dev/video{}", index);
    let device = Device::new(index).map_err(|e| CaptureError::unavailable(&device_name, e))?;

    let mut format = device
      .format()
      .map_err(|e| CaptureError::unavailable(&device_name, e))?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| CaptureError::unavailable(&device_name, e))?;

    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
      CaptureError::unavailable(
        &device_name,
        format!("不支持的像素格式 {}", format.fourcc),
      )
    })?;

    let mut stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS)
      .map_err(|e| CaptureError::unavailable(&device_name, e))?;
    stream.set_timeout(READ_TIMEOUT);

    info!(
      "摄像头已打开: {} {}x{} {:?}",
      device_name, format.width, format.height, pixel_format
    );

    Ok(Self {
      index,
      device: Some(device),
      stream: Some(stream),
      pixel_format,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn to_rgb_image(&self, data: &[u8]) -> Result<RgbImage, CaptureError> {
    let image = match self.pixel_format {
      PixelFormat::Yuyv => {
        RgbImage::from_raw(self.width, self.height, yuyv_to_rgb(data, self.width, self.height))
      }
      PixelFormat::Rgb3 => {
        let len = (self.width * self.height * 3) as usize;
        data
          .get(..len)
          .and_then(|raw| RgbImage::from_raw(self.width, self.height, raw.to_vec()))
      }
      PixelFormat::Mjpg => {
        let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
          .map_err(|e| CaptureError::TransientRead(format!("MJPG 解码失败: {}", e)))?;
        Some(decoded.to_rgb8())
      }
    };

    image.ok_or_else(|| CaptureError::TransientRead("帧数据长度不足".to_string()))
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

fn classify_read_error(err: io::Error) -> CaptureError {
  if err.raw_os_error() == Some(ENODEV) {
    CaptureError::EndOfStream
  } else {
    CaptureError::TransientRead(err.to_string())
  }
}

impl FrameSource for V4l2Camera {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    let stream = self.stream.as_mut().ok_or(CaptureError::EndOfStream)?;

    let (buffer, meta) = stream.next().map_err(classify_read_error)?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used == 0 { buffer } else { &buffer[..used] };
    // 释放对流的借用后再做格式转换
    let data = data.to_vec();

    let image = self.to_rgb_image(&data)?;
    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }

  fn close(&mut self) {
    // 先释放流，再释放设备
    if self.stream.take().is_some() {
      debug!("释放 /dev/video{} 的捕获流", self.index);
    }
    if self.device.take().is_some() {
      info!("摄像头已关闭: /dev/video{}", self.index);
    }
  }

  fn describe(&self) -> String {
    format!("v4l2:/dev/video{}", self.index)
  }
}

impl Drop for V4l2Camera {
  fn drop(&mut self) {
    self.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_grey_converts_to_grey_pixels() {
    let yuyv = [128u8, 128, 64, 128];
    let rgb = yuyv_to_rgb(&yuyv, 2, 1);
    assert_eq!(rgb, vec![128, 128, 128, 64, 64, 64]);
  }

  #[test]
  fn unplugged_device_ends_stream() {
    let err = classify_read_error(io::Error::from_raw_os_error(ENODEV));
    assert!(matches!(err, CaptureError::EndOfStream));

    let err = classify_read_error(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
    assert!(err.is_transient());
  }
}
