// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/pipeline.rs - 流水线集成测试
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
  collections::VecDeque,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
    mpsc,
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;

use shanan_live::{
  config::{DetectorConfig, PipelineConfig},
  frame::{Frame, Tensor},
  input::{CaptureError, FrameSource},
  model::{ClassNameTable, Detector, ModelError, Network, RawOutput},
  output::Annotator,
  task::{PipelineLoop, PipelineState, TaskError},
};

#[derive(Debug, Clone, Copy)]
enum Step {
  Frame,
  Transient,
  End,
}

#[derive(Default)]
struct DeviceCounts {
  opens: AtomicUsize,
  closes: AtomicUsize,
}

struct ScriptedSource {
  script: VecDeque<Step>,
  then: Step,
  index: u64,
  closed: bool,
  counts: Arc<DeviceCounts>,
}

impl FrameSource for ScriptedSource {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    if self.closed {
      return Err(CaptureError::EndOfStream);
    }
    match self.script.pop_front().unwrap_or(self.then) {
      Step::Frame => {
        let frame = Frame::new(RgbImage::new(640, 480), self.index, self.index * 33);
        self.index += 1;
        Ok(frame)
      }
      Step::Transient => Err(CaptureError::TransientRead("timeout".to_string())),
      Step::End => Err(CaptureError::EndOfStream),
    }
  }

  fn close(&mut self) {
    if !self.closed {
      self.closed = true;
      self.counts.closes.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn describe(&self) -> String {
    "scripted".to_string()
  }
}

fn opener(
  script: Vec<Step>,
  then: Step,
  counts: Arc<DeviceCounts>,
) -> impl FnMut() -> Result<ScriptedSource, CaptureError> + Send + 'static {
  move || {
    counts.opens.fetch_add(1, Ordering::SeqCst);
    Ok(ScriptedSource {
      script: script.iter().copied().collect(),
      then,
      index: 0,
      closed: false,
      counts: counts.clone(),
    })
  }
}

/// 每次返回同一个检测：类别 2，置信度 0.8，中心 (0.5, 0.5)，宽高 0.2
#[derive(Default)]
struct FakeNetwork {
  calls: Arc<AtomicUsize>,
  finished: Arc<AtomicUsize>,
  slow_calls: usize,
  delay: Duration,
  fail_on_call: Option<usize>,
  entered: Option<mpsc::Sender<usize>>,
}

impl Network for FakeNetwork {
  fn forward(&mut self, input: &Tensor) -> Result<Vec<RawOutput>, ModelError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(entered) = &self.entered {
      let _ = entered.send(call);
    }
    if call < self.slow_calls {
      thread::sleep(self.delay);
    }
    self.finished.fetch_add(1, Ordering::SeqCst);

    assert_eq!(input.shape(), [1, 3, 32, 32]);
    if self.fail_on_call == Some(call) {
      return Err(ModelError::Detection("injected".to_string()));
    }
    Ok(vec![RawOutput::from_rows(&[
      vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.3, 0.8],
      vec![0.1, 0.1, 0.1, 0.1, 0.2, 0.9, 0.0, 0.0],
    ])?])
  }
}

fn pipeline(
  network: FakeNetwork,
  source: impl FnMut() -> Result<ScriptedSource, CaptureError> + Send + 'static,
  config: PipelineConfig,
) -> PipelineLoop<ScriptedSource, FakeNetwork> {
  let detector_config = DetectorConfig {
    input_width: 32,
    input_height: 32,
    ..Default::default()
  };
  PipelineLoop::new(
    source,
    Detector::new(network, detector_config),
    Annotator::new(None),
    ClassNameTable::coco(),
    config,
  )
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  condition()
}

#[test]
fn transient_read_failures_are_retried_then_published() {
  let counts = Arc::new(DeviceCounts::default());
  let script = vec![Step::Transient, Step::Transient, Step::Transient, Step::Frame];
  let mut pipeline = pipeline(
    FakeNetwork::default(),
    opener(script, Step::End, counts.clone()),
    PipelineConfig::default(),
  );

  pipeline.start().unwrap();
  assert!(wait_until(Duration::from_secs(5), || {
    pipeline.state() == PipelineState::Stopped
  }));

  let published = pipeline.mailbox().take().unwrap();
  assert_eq!(published.frame.index, 0);
  assert_eq!(published.detections.len(), 1);
  assert_eq!(&*published.labels, &["car: 0.80".to_string()]);

  let detection = published.detections.items[0];
  assert_eq!(detection.class_id, 2);
  assert!((detection.bbox.x - 256.0).abs() < 1e-3);
  assert!((detection.bbox.y - 192.0).abs() < 1e-3);
  assert!((detection.bbox.width - 128.0).abs() < 1e-3);
  assert!((detection.bbox.height - 96.0).abs() < 1e-3);

  let stats = pipeline.stats();
  assert_eq!(stats.read_retries, 3);
  assert_eq!(stats.frames_captured, 1);
  assert_eq!(stats.frames_published, 1);

  pipeline.stop().unwrap();
  assert_eq!(counts.opens.load(Ordering::SeqCst), 1);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_during_inference_waits_for_cycle_and_restart_reopens() {
  let counts = Arc::new(DeviceCounts::default());
  let (entered_tx, entered_rx) = mpsc::channel();
  let calls = Arc::new(AtomicUsize::new(0));
  let finished = Arc::new(AtomicUsize::new(0));
  let network = FakeNetwork {
    calls: calls.clone(),
    finished: finished.clone(),
    slow_calls: usize::MAX,
    delay: Duration::from_millis(150),
    entered: Some(entered_tx),
    ..Default::default()
  };
  let mut pipeline = pipeline(
    network,
    opener(Vec::new(), Step::Frame, counts.clone()),
    PipelineConfig::default(),
  );

  pipeline.start().unwrap();
  entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
  assert_eq!(pipeline.state(), PipelineState::Running);

  pipeline.stop().unwrap();
  assert_eq!(pipeline.state(), PipelineState::Stopped);
  assert_eq!(
    calls.load(Ordering::SeqCst),
    finished.load(Ordering::SeqCst)
  );
  assert_eq!(counts.closes.load(Ordering::SeqCst), 1);

  pipeline.start().unwrap();
  entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
  pipeline.stop().unwrap();

  assert_eq!(counts.opens.load(Ordering::SeqCst), 2);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn stop_timeout_is_reported_and_next_start_reclaims_detector() {
  let counts = Arc::new(DeviceCounts::default());
  let (entered_tx, entered_rx) = mpsc::channel();
  let network = FakeNetwork {
    slow_calls: 1,
    delay: Duration::from_millis(400),
    entered: Some(entered_tx),
    ..Default::default()
  };
  let config = PipelineConfig {
    stop_timeout: Duration::from_millis(20),
    ..Default::default()
  };
  let mut pipeline = pipeline(network, opener(Vec::new(), Step::Frame, counts.clone()), config);

  pipeline.start().unwrap();
  entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

  assert!(matches!(pipeline.stop(), Err(TaskError::StopTimedOut(_))));
  assert_eq!(pipeline.state(), PipelineState::Stopping);

  // 等待上一个周期结束后收回检测器并重新打开设备
  pipeline.start().unwrap();
  assert_eq!(counts.opens.load(Ordering::SeqCst), 2);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 1);

  entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
  assert!(wait_until(Duration::from_secs(5), || pipeline.stop().is_ok()));
  assert_eq!(counts.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_detection_skips_only_that_frame() {
  let counts = Arc::new(DeviceCounts::default());
  let network = FakeNetwork {
    fail_on_call: Some(1),
    ..Default::default()
  };
  let script = vec![Step::Frame, Step::Frame, Step::Frame, Step::Frame];
  let mut pipeline = pipeline(
    network,
    opener(script, Step::End, counts.clone()),
    PipelineConfig::default(),
  );

  pipeline.start().unwrap();
  assert!(wait_until(Duration::from_secs(5), || {
    pipeline.state() == PipelineState::Stopped
  }));

  let stats = pipeline.stats();
  assert_eq!(stats.frames_captured, 4);
  assert_eq!(stats.frames_published, 3);
  assert_eq!(stats.detection_failures, 1);
  assert_eq!(pipeline.mailbox().take().unwrap().frame.index, 3);
  pipeline.stop().unwrap();
}

#[test]
fn lifecycle_misuse() {
  let counts = Arc::new(DeviceCounts::default());
  let mut pipeline = pipeline(
    FakeNetwork::default(),
    opener(Vec::new(), Step::Frame, counts.clone()),
    PipelineConfig::default(),
  );

  // 已停止时 stop 不做任何事
  pipeline.stop().unwrap();
  assert_eq!(pipeline.state(), PipelineState::Stopped);

  pipeline.start().unwrap();
  assert!(matches!(pipeline.start(), Err(TaskError::AlreadyRunning)));
  pipeline.stop().unwrap();
  pipeline.stop().unwrap();

  assert_eq!(counts.opens.load(Ordering::SeqCst), 1);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn unavailable_device_fails_start_and_keeps_detector() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let counts = Arc::new(DeviceCounts::default());
  let mut inner = opener(Vec::new(), Step::End, counts.clone());
  let source = {
    let attempts = attempts.clone();
    move || {
      if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
        Err(CaptureError::unavailable("/dev/video9", "no such device"))
      } else {
        inner()
      }
    }
  };
  let mut pipeline = pipeline(FakeNetwork::default(), source, PipelineConfig::default());

  assert!(matches!(
    pipeline.start(),
    Err(TaskError::Capture(CaptureError::DeviceUnavailable { .. }))
  ));
  assert_eq!(pipeline.state(), PipelineState::Stopped);

  pipeline.start().unwrap();
  pipeline.stop().unwrap();
  assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
#[test]
fn failed_thread_spawn_keeps_detector_and_closes_device() {
  let counts = Arc::new(DeviceCounts::default());
  let config = PipelineConfig {
    // 超出地址空间的栈，线程创建必然失败
    worker_stack_size: Some(1 << 60),
    ..Default::default()
  };
  let mut pipeline = pipeline(
    FakeNetwork::default(),
    opener(Vec::new(), Step::Frame, counts.clone()),
    config,
  );

  assert!(matches!(pipeline.start(), Err(TaskError::Spawn(_))));
  assert_eq!(pipeline.state(), PipelineState::Stopped);
  assert_eq!(counts.opens.load(Ordering::SeqCst), 1);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 1);

  // 检测器仍在，再次启动会重新打开设备而不是报告检测器丢失
  assert!(matches!(pipeline.start(), Err(TaskError::Spawn(_))));
  assert_eq!(counts.opens.load(Ordering::SeqCst), 2);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn dropping_a_running_loop_closes_the_device() {
  let counts = Arc::new(DeviceCounts::default());
  let (entered_tx, entered_rx) = mpsc::channel();
  let network = FakeNetwork {
    entered: Some(entered_tx),
    ..Default::default()
  };
  let mut pipeline = pipeline(
    network,
    opener(Vec::new(), Step::Frame, counts.clone()),
    PipelineConfig::default(),
  );

  pipeline.start().unwrap();
  entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
  drop(pipeline);

  assert_eq!(counts.opens.load(Ordering::SeqCst), 1);
  assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
}
