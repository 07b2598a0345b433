// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/model.rs - 检测模型接口
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

/// 推理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferParams {
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence_threshold: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  pub iou_threshold: f32,
  /// 推理分辨率（正方形边长）
  pub image_size: u32,
  /// 单张图像最多保留的检测数
  pub max_detections: usize,
}

impl Default for InferParams {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.25,
      iou_threshold: 0.7,
      image_size: 1280,
      max_detections: 300,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

/// 已加载的检测模型
///
/// 实现者不需要保证并发安全，调用方会串行化 `infer`。
pub trait Model: Send + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, image: &RgbImage, params: &InferParams) -> Result<Vec<DetectItem>, Self::Error>;
  fn class_name(&self, class_id: u32) -> Option<&str>;
}

/// 从权重文件构造模型，构造代价高昂
pub trait ModelLoader: Send + Sync + 'static {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, weights: &Path) -> Result<Self::Model, Self::Error>;
}

pub mod yolo;

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnYolo, RknnYoloError, RknnYoloLoader};
