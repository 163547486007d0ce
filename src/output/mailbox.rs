// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/mailbox.rs - 最新帧信箱
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
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use super::AnnotatedFrame;

#[derive(Default)]
struct Slot {
  frame: Mutex<Option<AnnotatedFrame>>,
  ready: Condvar,
}

/// 单槽信箱：流水线线程覆盖写入，显示线程取走
///
/// 只在交换时持锁，消费者慢时只会看到最新一帧。
#[derive(Clone, Default)]
pub struct FrameMailbox {
  slot: Arc<Slot>,
}

impl FrameMailbox {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Option<AnnotatedFrame>> {
    self
      .slot
      .frame
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// 写入新帧，返回被覆盖的未读帧
  pub fn publish(&self, frame: AnnotatedFrame) -> Option<AnnotatedFrame> {
    let replaced = self.lock().replace(frame);
    self.slot.ready.notify_one();
    replaced
  }

  /// 取走当前帧（读后清空），没有新帧时立即返回
  pub fn take(&self) -> Option<AnnotatedFrame> {
    self.lock().take()
  }

  /// 等待至多 `timeout` 直到有新帧
  pub fn take_timeout(&self, timeout: Duration) -> Option<AnnotatedFrame> {
    let guard = self.lock();
    let (mut guard, _) = self
      .slot
      .ready
      .wait_timeout_while(guard, timeout, |frame| frame.is_none())
      .unwrap_or_else(PoisonError::into_inner);
    guard.take()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_none()
  }
}

#[cfg(test)]
mod tests {
  use std::{thread, time::Instant};

  use image::RgbImage;

  use super::*;
  use crate::{frame::Frame, model::DetectResult};

  fn annotated(index: u64) -> AnnotatedFrame {
    AnnotatedFrame {
      frame: Frame::new(RgbImage::new(2, 2), index, index * 33),
      detections: DetectResult::default(),
      labels: Box::new([]),
    }
  }

  #[test]
  fn newest_frame_overwrites_unread_one() {
    let mailbox = FrameMailbox::new();
    assert!(mailbox.publish(annotated(0)).is_none());
    let dropped = mailbox.publish(annotated(1)).unwrap();
    assert_eq!(dropped.frame.index, 0);

    assert_eq!(mailbox.take().unwrap().frame.index, 1);
    assert!(mailbox.take().is_none());
    assert!(mailbox.is_empty());
  }

  #[test]
  fn take_timeout_wakes_on_publish() {
    let mailbox = FrameMailbox::new();
    let producer = mailbox.clone();
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      producer.publish(annotated(3));
    });

    let frame = mailbox.take_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(frame.frame.index, 3);
    handle.join().unwrap();
  }

  #[test]
  fn take_timeout_gives_up() {
    let mailbox = FrameMailbox::new();
    let now = Instant::now();
    assert!(mailbox.take_timeout(Duration::from_millis(30)).is_none());
    assert!(now.elapsed() >= Duration::from_millis(30));
  }
}
