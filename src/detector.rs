// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/detector.rs - 检测引擎适配层
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
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::{DetectItem, InferParams, Model, ModelLoader};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const UNKNOWN_CLASS: &str = "unknown";

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("{0}")]
  Decode(#[from] image::ImageError),
  #[error("{0}")]
  Engine(#[source] BoxError),
}

impl DetectError {
  fn engine<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    DetectError::Engine(Box::new(err))
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  /// 置信度
  pub confidence: f32,
  /// 类别索引
  #[serde(rename = "class")]
  pub class_id: u32,
  /// 类别名称
  pub class_name: String,
}

impl DetectionRecord {
  fn new(item: DetectItem, class_name: Option<&str>) -> Self {
    let [x1, y1, x2, y2] = item.bbox;
    Self {
      x1,
      y1,
      x2,
      y2,
      confidence: item.score,
      class_id: item.class_id,
      class_name: class_name.unwrap_or(UNKNOWN_CLASS).to_string(),
    }
  }
}

/// 对图像字节执行检测
pub trait DetectImage: Send + Sync + 'static {
  fn detect(
    &self,
    image_bytes: &[u8],
    params: &InferParams,
  ) -> Result<Vec<DetectionRecord>, DetectError>;
}

/// 进程内唯一的检测引擎句柄
///
/// 模型在第一次检测时构造，之后一直复用。构造过程持有 `slot` 锁，
/// 并发的首次请求会等待同一次构造的结果。模型本身不保证线程安全，
/// 每次推理都在模型锁内进行。
pub struct Detector<L: ModelLoader> {
  loader: L,
  weights: PathBuf,
  slot: Mutex<Option<Arc<Mutex<L::Model>>>>,
}

impl<L: ModelLoader> Detector<L> {
  pub fn new(loader: L, weights: impl Into<PathBuf>) -> Self {
    Self {
      loader,
      weights: weights.into(),
      slot: Mutex::new(None),
    }
  }

  pub fn weights(&self) -> &Path {
    &self.weights
  }

  pub fn is_loaded(&self) -> bool {
    self.slot.lock().is_some()
  }

  /// 提前构造模型
  pub fn warm_up(&self) -> Result<(), DetectError> {
    self.model().map(|_| ())
  }

  fn model(&self) -> Result<Arc<Mutex<L::Model>>, DetectError> {
    let mut slot = self.slot.lock();
    if let Some(model) = slot.as_ref() {
      return Ok(Arc::clone(model));
    }

    info!("加载模型: {}", self.weights.display());
    let now = Instant::now();
    let model = self.loader.load(&self.weights).map_err(|e| {
      error!("模型加载失败: {}", e);
      DetectError::engine(e)
    })?;
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());

    let model = Arc::new(Mutex::new(model));
    *slot = Some(Arc::clone(&model));
    Ok(model)
  }
}

impl<L: ModelLoader> DetectImage for Detector<L> {
  fn detect(
    &self,
    image_bytes: &[u8],
    params: &InferParams,
  ) -> Result<Vec<DetectionRecord>, DetectError> {
    let model = self.model()?;

    debug!("解码图像，大小 {} 字节", image_bytes.len());
    let image = image::load_from_memory(image_bytes)
      .map_err(|e| {
        error!("图像解码失败: {}", e);
        e
      })?
      .to_rgb8();
    info!("图像解码成功: {}x{}", image.width(), image.height());

    debug!(
      "开始推理: imgsz={}, conf={}, iou={}, max_det={}",
      params.image_size,
      params.confidence_threshold,
      params.iou_threshold,
      params.max_detections
    );
    let model = match model.try_lock() {
      Some(guard) => guard,
      None => {
        warn!("检测引擎正忙，等待上一次推理结束");
        model.lock()
      }
    };
    let now = Instant::now();
    let items = model.infer(&image, params).map_err(|e| {
      error!("推理失败: {}", e);
      DetectError::engine(e)
    })?;
    info!("推理完成，耗时: {:.2?}, 检测数: {}", now.elapsed(), items.len());

    Ok(
      items
        .into_iter()
        .map(|item| {
          let class_name = model.class_name(item.class_id);
          DetectionRecord::new(item, class_name)
        })
        .collect(),
    )
  }
}
