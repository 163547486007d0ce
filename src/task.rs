// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 采集-推理-绘制流水线
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
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, RecvTimeoutError},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  frame::Frame,
  input::{CaptureError, FrameSource, SourceGuard},
  model::{ClassNameTable, Decoder, Detector, ModelError, Network, Suppressor},
  output::{AnnotatedFrame, Annotator, FrameMailbox},
};

const PIPELINE_THREAD_NAME: &str = "shanan-pipeline";
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("流水线已在运行")]
  AlreadyRunning,
  #[error("等待流水线停止超时 ({0:?})")]
  StopTimedOut(Duration),
  #[error("流水线线程异常退出，检测器已丢失")]
  DetectorLost,
  #[error("无法创建流水线线程: {0}")]
  Spawn(std::io::Error),
  #[error("采集错误: {0}")]
  Capture(#[from] CaptureError),
  #[error("无法设置中断处理: {0}")]
  Signal(#[from] ctrlc::Error),
}

/// 安装 Ctrl-C 处理：置位退出标志，30 秒后仍未退出则强制结束进程
pub fn install_interrupt_handler(quit: Arc<AtomicBool>) -> Result<(), TaskError> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    quit.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Stopped,
  Running,
  Stopping,
}

/// 流水线计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
  pub frames_captured: u64,
  pub frames_published: u64,
  pub read_retries: u64,
  pub detection_failures: u64,
}

#[derive(Default)]
struct Counters {
  frames_captured: AtomicU64,
  frames_published: AtomicU64,
  read_retries: AtomicU64,
  detection_failures: AtomicU64,
}

impl Counters {
  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  fn snapshot(&self) -> PipelineStats {
    PipelineStats {
      frames_captured: self.frames_captured.load(Ordering::Relaxed),
      frames_published: self.frames_published.load(Ordering::Relaxed),
      read_retries: self.read_retries.load(Ordering::Relaxed),
      detection_failures: self.detection_failures.load(Ordering::Relaxed),
    }
  }
}

/// 每个周期依次经过的处理阶段，随流水线线程移动
struct Stages<N> {
  detector: Detector<N>,
  decoder: Decoder,
  suppressor: Suppressor,
  annotator: Annotator,
  classes: ClassNameTable,
}

impl<N: Network> Stages<N> {
  fn process(&mut self, frame: Frame) -> Result<AnnotatedFrame, ModelError> {
    let outputs = self.detector.infer(&frame.image)?;
    let candidates = self
      .decoder
      .decode(&outputs, frame.width(), frame.height());
    let detections = self.suppressor.suppress(candidates);
    Ok(
      self
        .annotator
        .annotate(frame, detections.into(), &self.classes),
    )
  }
}

struct Worker<N> {
  handle: JoinHandle<Option<Stages<N>>>,
  // 线程结束（包括 panic）时发送端被释放
  done: mpsc::Receiver<()>,
}

struct LoopContext {
  stop: Arc<AtomicBool>,
  counters: Arc<Counters>,
  mailbox: FrameMailbox,
  config: PipelineConfig,
}

pub type SourceOpener<S> = Box<dyn FnMut() -> Result<S, CaptureError> + Send>;

/// 采集、推理、绘制并发布到信箱的后台循环
///
/// 状态转换为 `Stopped -> Running -> Stopping -> Stopped`。检测器在运行期间移动到
/// 流水线线程中，停止后收回。
pub struct PipelineLoop<S, N> {
  opener: SourceOpener<S>,
  stages: Option<Stages<N>>,
  worker: Option<Worker<N>>,
  state: PipelineState,
  stop: Arc<AtomicBool>,
  counters: Arc<Counters>,
  mailbox: FrameMailbox,
  config: PipelineConfig,
}

impl<S, N> PipelineLoop<S, N>
where
  S: FrameSource + 'static,
  N: Network + 'static,
{
  pub fn new(
    opener: impl FnMut() -> Result<S, CaptureError> + Send + 'static,
    detector: Detector<N>,
    annotator: Annotator,
    classes: ClassNameTable,
    config: PipelineConfig,
  ) -> Self {
    let decoder = Decoder::from_config(detector.config());
    let suppressor = Suppressor::from_config(detector.config());

    Self {
      opener: Box::new(opener),
      stages: Some(Stages {
        detector,
        decoder,
        suppressor,
        annotator,
        classes,
      }),
      worker: None,
      state: PipelineState::Stopped,
      stop: Arc::new(AtomicBool::new(false)),
      counters: Arc::new(Counters::default()),
      mailbox: FrameMailbox::new(),
      config,
    }
  }

  /// 显示端读取结果的信箱
  pub fn mailbox(&self) -> FrameMailbox {
    self.mailbox.clone()
  }

  pub fn stats(&self) -> PipelineStats {
    self.counters.snapshot()
  }

  /// 当前状态；流水线线程自行结束（例如输入流结束）后视为已停止
  pub fn state(&self) -> PipelineState {
    match &self.worker {
      Some(worker) if worker.handle.is_finished() => PipelineState::Stopped,
      _ => self.state,
    }
  }

  /// 打开输入源并启动流水线线程
  ///
  /// 输入源在调用线程上打开，打开失败直接返回。
  pub fn start(&mut self) -> Result<(), TaskError> {
    if self.state() == PipelineState::Running {
      return Err(TaskError::AlreadyRunning);
    }

    // 上一次超时未收回的检测器在这里收回
    self.reclaim()?;
    let stages = self.stages.take().ok_or(TaskError::DetectorLost)?;

    let mut source = match (self.opener)() {
      Ok(source) => source,
      Err(e) => {
        self.stages = Some(stages);
        error!("无法打开输入源: {}", e);
        return Err(e.into());
      }
    };
    info!("输入源已打开: {}", source.describe());

    self.stop.store(false, Ordering::SeqCst);
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let context = LoopContext {
      stop: self.stop.clone(),
      counters: self.counters.clone(),
      mailbox: self.mailbox.clone(),
      config: self.config.clone(),
    };

    // 线程创建成功后才把输入源和检测器交出去
    let (launch_tx, launch_rx) = mpsc::channel::<(S, Stages<N>)>();
    let mut builder = thread::Builder::new().name(PIPELINE_THREAD_NAME.to_string());
    if let Some(size) = self.config.worker_stack_size {
      builder = builder.stack_size(size);
    }
    let spawned = builder.spawn(move || {
      let _done = done_tx;
      let (source, stages) = launch_rx.recv().ok()?;
      Some(run_loop(source, stages, context))
    });

    let handle = match spawned {
      Ok(handle) => handle,
      Err(e) => {
        source.close();
        self.stages = Some(stages);
        error!("无法创建流水线线程: {}", e);
        return Err(TaskError::Spawn(e));
      }
    };
    if let Err(mpsc::SendError((mut source, stages))) = launch_tx.send((source, stages)) {
      source.close();
      self.stages = Some(stages);
      let _ = handle.join();
      return Err(TaskError::Spawn(std::io::Error::other("流水线线程提前退出")));
    }

    self.worker = Some(Worker {
      handle,
      done: done_rx,
    });
    self.state = PipelineState::Running;
    Ok(())
  }

  /// 请求停止并等待当前周期结束
  ///
  /// 超时返回 [`TaskError::StopTimedOut`]，流水线线程会在当前周期结束后自行退出，
  /// 检测器由下一次 `start()` 收回。
  pub fn stop(&mut self) -> Result<(), TaskError> {
    let Some(worker) = &self.worker else {
      self.state = PipelineState::Stopped;
      return Ok(());
    };

    self.state = PipelineState::Stopping;
    self.stop.store(true, Ordering::SeqCst);

    let timeout = self.config.stop_timeout;
    if let Err(RecvTimeoutError::Timeout) = worker.done.recv_timeout(timeout) {
      warn!("流水线未在 {:?} 内停止", timeout);
      return Err(TaskError::StopTimedOut(timeout));
    }

    self.reclaim()?;
    info!("流水线已停止: {:?}", self.stats());
    Ok(())
  }

  fn reclaim(&mut self) -> Result<(), TaskError> {
    if let Some(worker) = self.worker.take() {
      self.state = PipelineState::Stopped;
      match worker.handle.join() {
        Ok(Some(stages)) => self.stages = Some(stages),
        Ok(None) | Err(_) => {
          error!("流水线线程 panic，检测器已丢失");
          return Err(TaskError::DetectorLost);
        }
      }
    }
    self.state = PipelineState::Stopped;
    Ok(())
  }
}

impl<S, N> Drop for PipelineLoop<S, N> {
  fn drop(&mut self) {
    if let Some(worker) = self.worker.take() {
      self.stop.store(true, Ordering::SeqCst);
      let timeout = self.config.stop_timeout;
      match worker.done.recv_timeout(timeout) {
        Err(RecvTimeoutError::Timeout) => {
          warn!("流水线未在 {:?} 内停止，放弃等待", timeout);
        }
        _ => {
          let _ = worker.handle.join();
        }
      }
    }
  }
}

fn run_loop<S: FrameSource, N: Network>(
  source: S,
  mut stages: Stages<N>,
  context: LoopContext,
) -> Stages<N> {
  let LoopContext {
    stop,
    counters,
    mailbox,
    config,
  } = context;
  let warn_every = config.retry_warn_every.max(1);

  let mut source = SourceGuard::new(source);
  let mut consecutive_failures = 0u64;
  info!("流水线开始: {}", source.describe());

  while !stop.load(Ordering::SeqCst) {
    let frame = match source.read_frame() {
      Ok(frame) => {
        consecutive_failures = 0;
        frame
      }
      Err(CaptureError::TransientRead(reason)) => {
        consecutive_failures += 1;
        Counters::bump(&counters.read_retries);
        if consecutive_failures % warn_every == 0 {
          warn!("连续 {} 次读帧失败: {}", consecutive_failures, reason);
        } else {
          debug!("读帧失败，稍后重试: {}", reason);
        }
        thread::sleep(config.retry_delay);
        continue;
      }
      Err(CaptureError::EndOfStream) => {
        info!("输入流结束");
        break;
      }
      Err(e) => {
        error!("输入源不可用，流水线退出: {}", e);
        break;
      }
    };
    Counters::bump(&counters.frames_captured);

    let index = frame.index;
    let now = Instant::now();
    match stages.process(frame) {
      Ok(annotated) => {
        let objects = annotated.detections.len();
        mailbox.publish(annotated);
        Counters::bump(&counters.frames_published);
        debug!(
          "第 {} 帧处理完成，{} 个目标，耗时 {:.2?}",
          index,
          objects,
          now.elapsed()
        );
      }
      Err(e) => {
        Counters::bump(&counters.detection_failures);
        warn!("第 {} 帧检测失败，跳过: {}", index, e);
      }
    }
  }

  info!("流水线退出");
  stages
}
