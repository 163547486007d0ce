// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_file.rs - 图像文件回放输入
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

use std::{
  path::{Path, PathBuf},
  thread,
  time::{Duration, Instant},
};

use image::{ImageReader, RgbImage};
use tracing::{debug, info};

use super::{CaptureError, FrameSource};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// 把单张图片或目录中的图片当作摄像头回放
pub struct ImageFileSource {
  path: PathBuf,
  images: Vec<RgbImage>,
  cursor: usize,
  looping: bool,
  frame_interval: Option<Duration>,
  last_frame: Option<Instant>,
  frame_index: u64,
  start_time: Instant,
  closed: bool,
}

impl ImageFileSource {
  /// 打开图片文件或图片目录（按文件名排序）
  pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
    let path = path.as_ref().to_path_buf();
    let device = path.display().to_string();

    let files = if path.is_dir() {
      let mut files = std::fs::read_dir(&path)
        .map_err(|e| CaptureError::unavailable(&device, e))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|p| is_image_file(p))
        .collect::<Vec<_>>();
      files.sort();
      files
    } else {
      vec![path.clone()]
    };

    let images = files
      .iter()
      .map(|file| {
        ImageReader::open(file)
          .map_err(|e| CaptureError::unavailable(file.display().to_string(), e))?
          .decode()
          .map(|image| image.to_rgb8())
          .map_err(|e| CaptureError::unavailable(file.display().to_string(), e))
      })
      .collect::<Result<Vec<_>, _>>()?;

    if images.is_empty() {
      return Err(CaptureError::unavailable(device, "目录中没有图片"));
    }

    info!("图片输入已打开: {} ({} 张)", device, images.len());
    Ok(Self::from_images(path, images))
  }

  /// 直接从内存中的图片构造
  pub fn from_images(path: impl Into<PathBuf>, images: Vec<RgbImage>) -> Self {
    Self {
      path: path.into(),
      images,
      cursor: 0,
      looping: false,
      frame_interval: None,
      last_frame: None,
      frame_index: 0,
      start_time: Instant::now(),
      closed: false,
    }
  }

  /// 播放完毕后从头开始
  pub fn with_looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  /// 按固定间隔出帧，模拟摄像头帧率
  pub fn with_frame_interval(mut self, interval: Option<Duration>) -> Self {
    self.frame_interval = interval;
    self
  }

  fn pace(&mut self) {
    if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
      let elapsed = last.elapsed();
      if elapsed < interval {
        thread::sleep(interval - elapsed);
      }
    }
    self.last_frame = Some(Instant::now());
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false)
}

impl FrameSource for ImageFileSource {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    if self.closed {
      return Err(CaptureError::EndOfStream);
    }

    if self.cursor >= self.images.len() {
      if !self.looping {
        return Err(CaptureError::EndOfStream);
      }
      debug!("图片输入回到开头");
      self.cursor = 0;
    }

    self.pace();

    let image = self.images[self.cursor].clone();
    self.cursor += 1;

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }

  fn close(&mut self) {
    if !self.closed {
      debug!("关闭图片输入: {}", self.path.display());
      self.closed = true;
    }
  }

  fn describe(&self) -> String {
    format!("image:{}", self.path.display())
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  #[test]
  fn replays_directory_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 4, Rgb([10, 0, 0]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbImage::from_pixel(4, 4, Rgb([20, 0, 0]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let mut source = ImageFileSource::open(dir.path()).unwrap();
    let first = source.read_frame().unwrap();
    let second = source.read_frame().unwrap();
    assert_eq!(first.image.get_pixel(0, 0)[0], 20);
    assert_eq!(second.image.get_pixel(0, 0)[0], 10);
    assert_eq!((first.index, second.index), (0, 1));
    assert!(matches!(source.read_frame(), Err(CaptureError::EndOfStream)));
  }

  #[test]
  fn looping_restarts_and_close_ends_stream() {
    let image = RgbImage::new(2, 2);
    let mut source = ImageFileSource::from_images("memory", vec![image]).with_looping(true);
    for expected in 0..3 {
      assert_eq!(source.read_frame().unwrap().index, expected);
    }

    source.close();
    source.close();
    assert!(matches!(source.read_frame(), Err(CaptureError::EndOfStream)));
  }

  #[test]
  fn missing_file_is_unavailable() {
    let result = ImageFileSource::open("/definitely/not/here.png");
    assert!(matches!(
      result,
      Err(CaptureError::DeviceUnavailable { .. })
    ));
  }
}
