// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/darknet.rs - OpenCV DNN 加载的 darknet 网络
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

use std::path::Path;

use opencv::{
  core::{CV_32F, Mat, Scalar, Vector},
  dnn::{self, Net},
  prelude::*,
};
use tracing::info;

use super::{ModelError, Network, RawOutput};
use crate::{
  config::{Backend, Target},
  frame::Tensor,
};

impl Backend {
  fn dnn_id(self) -> i32 {
    match self {
      Backend::Default => dnn::DNN_BACKEND_DEFAULT,
      Backend::Opencv => dnn::DNN_BACKEND_OPENCV,
      Backend::Cuda => dnn::DNN_BACKEND_CUDA,
    }
  }
}

impl Target {
  fn dnn_id(self) -> i32 {
    match self {
      Target::Cpu => dnn::DNN_TARGET_CPU,
      Target::Opencl => dnn::DNN_TARGET_OPENCL,
      Target::OpenclFp16 => dnn::DNN_TARGET_OPENCL_FP16,
      Target::Cuda => dnn::DNN_TARGET_CUDA,
      Target::CudaFp16 => dnn::DNN_TARGET_CUDA_FP16,
    }
  }
}

fn detection(err: opencv::Error) -> ModelError {
  ModelError::Detection(err.to_string())
}

/// darknet `.cfg` + `.weights` 网络
pub struct DarknetNetwork {
  net: Net,
  output_names: Vector<String>,
}

impl DarknetNetwork {
  pub fn load(
    config_path: &Path,
    weights_path: &Path,
    backend: Backend,
    target: Target,
  ) -> Result<Self, ModelError> {
    let describe = format!("{} + {}", config_path.display(), weights_path.display());
    let load_error = |e: opencv::Error| ModelError::load(&describe, e);

    let mut net = dnn::read_net_from_darknet(
      &config_path.to_string_lossy(),
      &weights_path.to_string_lossy(),
    )
    .map_err(load_error)?;
    if net.empty().map_err(load_error)? {
      return Err(ModelError::load(&describe, "网络为空"));
    }

    net
      .set_preferable_backend(backend.dnn_id())
      .map_err(load_error)?;
    net.set_preferable_target(target.dnn_id()).map_err(load_error)?;

    let output_names = net.get_unconnected_out_layers_names().map_err(load_error)?;
    info!(
      "模型已加载: {} ({:?}/{:?}, {} 个输出层)",
      describe,
      backend,
      target,
      output_names.len()
    );

    Ok(Self { net, output_names })
  }
}

impl Network for DarknetNetwork {
  fn forward(&mut self, input: &Tensor) -> Result<Vec<RawOutput>, ModelError> {
    let sizes = input.shape().map(|dim| dim as i32);
    let mut blob = Mat::new_nd_with_default(&sizes, CV_32F, Scalar::all(0.0)).map_err(detection)?;
    blob
      .data_typed_mut::<f32>()
      .map_err(detection)?
      .copy_from_slice(input.as_slice());

    self
      .net
      .set_input(&blob, "", 1.0, Scalar::default())
      .map_err(detection)?;

    let mut outputs = Vector::<Mat>::new();
    self
      .net
      .forward(&mut outputs, &self.output_names)
      .map_err(detection)?;

    outputs
      .iter()
      .map(|mat| {
        let rows = mat.rows().max(0) as usize;
        let cols = mat.cols().max(0) as usize;
        let data = mat.data_typed::<f32>().map_err(detection)?.to_vec();
        RawOutput::new(rows, cols, data)
      })
      .collect()
  }
}
