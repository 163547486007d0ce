// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::ImageFileSource;

#[cfg(feature = "v4l_camera")]
mod v4l2_camera;
#[cfg(feature = "v4l_camera")]
pub use self::v4l2_camera::V4l2Camera;

#[cfg(feature = "opencv_camera")]
mod opencv_camera;
#[cfg(feature = "opencv_camera")]
pub use self::opencv_camera::OpenCvCamera;

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("无法打开设备 {device}: {reason}")]
  DeviceUnavailable { device: String, reason: String },
  #[error("输入流已结束")]
  EndOfStream,
  #[error("读帧失败: {0}")]
  TransientRead(String),
}

impl CaptureError {
  pub fn unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
    CaptureError::DeviceUnavailable {
      device: device.into(),
      reason: reason.to_string(),
    }
  }

  /// 单帧失败，调用方应退避后重试
  pub fn is_transient(&self) -> bool {
    matches!(self, CaptureError::TransientRead(_))
  }
}

/// 帧来源
///
/// 打开设备由各实现的构造函数完成（例如 `V4l2Camera::open(index, ..)`），
/// 失败时返回 [`CaptureError::DeviceUnavailable`]。
pub trait FrameSource: Send {
  /// 读取下一帧，可能阻塞于设备 I/O
  fn read_frame(&mut self) -> Result<Frame, CaptureError>;

  /// 释放设备，可重复调用
  fn close(&mut self);

  /// 设备描述，用于日志
  fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    (**self).read_frame()
  }

  fn close(&mut self) {
    (**self).close()
  }

  fn describe(&self) -> String {
    (**self).describe()
  }
}

/// 作用域守卫：离开作用域（包括 panic 展开）时关闭帧来源
pub struct SourceGuard<S: FrameSource> {
  source: S,
}

impl<S: FrameSource> SourceGuard<S> {
  pub fn new(source: S) -> Self {
    Self { source }
  }
}

impl<S: FrameSource> std::ops::Deref for SourceGuard<S> {
  type Target = S;

  fn deref(&self) -> &S {
    &self.source
  }
}

impl<S: FrameSource> std::ops::DerefMut for SourceGuard<S> {
  fn deref_mut(&mut self) -> &mut S {
    &mut self.source
  }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
  fn drop(&mut self) {
    self.source.close();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use super::*;

  struct CountingSource {
    closed: Arc<AtomicUsize>,
  }

  impl FrameSource for CountingSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
      Err(CaptureError::EndOfStream)
    }

    fn close(&mut self) {
      self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
      "counting".to_string()
    }
  }

  #[test]
  fn guard_closes_source_on_drop() {
    let closed = Arc::new(AtomicUsize::new(0));
    {
      let mut guard = SourceGuard::new(CountingSource {
        closed: closed.clone(),
      });
      assert!(matches!(guard.read_frame(), Err(CaptureError::EndOfStream)));
    }
    assert_eq!(closed.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn only_read_failures_are_transient() {
    assert!(CaptureError::TransientRead("timeout".into()).is_transient());
    assert!(!CaptureError::EndOfStream.is_transient());
    assert!(!CaptureError::unavailable("/dev/video9", "no such device").is_transient());
  }
}
