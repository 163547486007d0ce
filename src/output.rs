// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, model::DetectResult};

pub mod draw;
pub mod mailbox;

pub use self::draw::{AnnotateError, Annotator};
pub use self::mailbox::FrameMailbox;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

/// 绘制完成、等待显示的一帧
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  /// 已绘制检测框的帧
  pub frame: Frame,
  pub detections: DetectResult,
  /// 与 `detections` 一一对应的标签文本
  pub labels: Box<[String]>,
}

/// 显示端
pub trait DisplaySink {
  type Error;

  fn present(&mut self, frame: &AnnotatedFrame) -> Result<(), Self::Error>;

  fn finish(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

const NULL_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// 丢弃所有帧，只定期输出吞吐量
pub struct NullOutput {
  presented: u64,
  window_frames: u64,
  window_start: Instant,
}

impl Default for NullOutput {
  fn default() -> Self {
    Self {
      presented: 0,
      window_frames: 0,
      window_start: Instant::now(),
    }
  }
}

impl NullOutput {
  pub fn presented(&self) -> u64 {
    self.presented
  }
}

impl FromUrlWithScheme for NullOutput {
  const SCHEME: &'static str = "null";
}

impl FromUrl for NullOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl DisplaySink for NullOutput {
  type Error = OutputError;

  fn present(&mut self, _frame: &AnnotatedFrame) -> Result<(), Self::Error> {
    self.presented += 1;
    self.window_frames += 1;

    let elapsed = self.window_start.elapsed();
    if elapsed >= NULL_REPORT_INTERVAL {
      info!(
        "已显示 {} 帧 ({:.1} fps)",
        self.presented,
        self.window_frames as f64 / elapsed.as_secs_f64()
      );
      self.window_frames = 0;
      self.window_start = Instant::now();
    }
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    info!("显示结束，共 {} 帧", self.presented);
    Ok(())
  }
}

pub enum OutputWrapper {
  NullOutput(NullOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      NullOutput::SCHEME => Ok(OutputWrapper::NullOutput(NullOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DisplaySink for OutputWrapper {
  type Error = OutputError;

  fn present(&mut self, frame: &AnnotatedFrame) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::NullOutput(output) => output.present(frame),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        output.present(frame).map_err(OutputError::from)
      }
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::NullOutput(output) => output.finish(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.finish().map_err(OutputError::from),
    }
  }
}
