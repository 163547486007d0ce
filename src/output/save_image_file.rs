// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存最新帧到图像文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::{AnnotatedFrame, DisplaySink};
use crate::{FromUrl, FromUrlWithScheme};

/// 每帧覆盖同一个图像文件，外部查看器可以轮询该文件
pub struct SaveImageFileOutput {
  path: PathBuf,
  saved: u64,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      saved: 0,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl DisplaySink for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn present(&mut self, frame: &AnnotatedFrame) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    frame
      .frame
      .image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;
    self.saved += 1;

    debug!("保存第 {} 帧到文件: {}", frame.frame.index, self.path.display());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    info!("共保存 {} 帧到 {}", self.saved, self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{frame::Frame, model::DetectResult};

  fn annotated(value: u8) -> AnnotatedFrame {
    AnnotatedFrame {
      frame: Frame::new(RgbImage::from_pixel(3, 3, Rgb([value, 0, 0])), 0, 0),
      detections: DetectResult::default(),
      labels: Box::new([]),
    }
  }

  #[test]
  fn overwrites_single_file_with_newest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("latest.png");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();

    let mut output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), path.as_path());
    output.present(&annotated(10)).unwrap();
    output.present(&annotated(200)).unwrap();
    output.finish().unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(1, 1)[0], 200);
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
