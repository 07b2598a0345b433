// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/model/rknn.rs - 基于 RKNPU 的 YOLO 端到端检测模型
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

use image::RgbImage;
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::model::{
  DetectItem, InferParams, Model, ModelLoader,
  yolo::{END2END_ROW, decode_end2end, letterbox},
};

const RKNN_YOLO_NUM_INPUTS: u32 = 1;
const RKNN_YOLO_NUM_OUTPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnYoloError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("输出长度 {0} 不是 {1} 的整数倍")]
  OutputShape(usize, usize),
}

impl RknnYoloError {
  fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnYoloError::ModelInvalid(msg.to_string(), e)
  }
}

/// 从 `.rknn` 文件构造检测模型
pub struct RknnYoloLoader {
  labels: Vec<String>,
  flags: InitFlags,
}

impl RknnYoloLoader {
  pub fn new(labels: Vec<String>) -> Self {
    Self {
      labels,
      flags: InitFlags::default(),
    }
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl ModelLoader for RknnYoloLoader {
  type Model = RknnYolo;
  type Error = RknnYoloError;

  fn load(&self, weights: &Path) -> Result<Self::Model, Self::Error> {
    info!("加载模型文件: {}", weights.display());
    let model_data = std::fs::read(weights)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnYoloError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnYoloError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_YOLO_NUM_INPUTS || num_outputs != RKNN_YOLO_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_YOLO_NUM_INPUTS, RKNN_YOLO_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknnYoloError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成, 类别表: {:?}", self.labels);
    Ok(RknnYolo {
      context,
      labels: self.labels.clone(),
    })
  }
}

pub struct RknnYolo {
  context: Context,
  labels: Vec<String>,
}

impl Model for RknnYolo {
  type Error = RknnYoloError;

  fn infer(&self, image: &RgbImage, params: &InferParams) -> Result<Vec<DetectItem>, Self::Error> {
    let (canvas, info) = letterbox(image, params.image_size);

    debug!("设置模型输入");
    self
      .context
      .set_input(0, canvas.as_raw(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?;
    if data.len() % END2END_ROW != 0 {
      return Err(RknnYoloError::OutputShape(data.len(), END2END_ROW));
    }

    let items = decode_end2end(&data[..], params)
      .into_iter()
      .map(|item| DetectItem {
        bbox: info.restore(item.bbox),
        ..item
      })
      .collect::<Vec<_>>();
    debug!("检测到 {} 个物体", items.len());
    Ok(items)
  }

  fn class_name(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }
}
