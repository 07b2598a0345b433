// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/model/yolo.rs - YOLO 前处理与后处理
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

use image::{Rgb, RgbImage, imageops};
use tracing::debug;

use crate::model::{DetectItem, InferParams};

/// 端到端输出每行: x1, y1, x2, y2, score, class
pub const END2END_ROW: usize = 6;

const PAD_VALUE: u8 = 114;

/// 缩放信息，用于把模型坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub width: u32,
  pub height: u32,
}

impl Letterbox {
  /// 模型输入坐标 -> 原图坐标，并裁剪到图像范围内
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.width as f32;
    let h = self.height as f32;
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
    ]
  }
}

/// 等比缩放到 `size` x `size` 画布，空白处填充灰色
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
  let size = size.max(1);
  let (width, height) = image.dimensions();
  let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
  let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
  let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);

  let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
  let pad_x = (size - new_w) / 2;
  let pad_y = (size - new_h) / 2;

  let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
  imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

  debug!(
    "letterbox: {}x{} -> {}x{}, 缩放 {:.4}, 偏移 ({}, {})",
    width, height, new_w, new_h, scale, pad_x, pad_y
  );

  (
    canvas,
    Letterbox {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
      width,
      height,
    },
  )
}

/// 解析无需 NMS 的端到端输出，保持模型给出的顺序
pub fn decode_end2end(output: &[f32], params: &InferParams) -> Vec<DetectItem> {
  let candidates = output
    .chunks_exact(END2END_ROW)
    .filter(|row| row[4] >= params.confidence_threshold && row[5] >= 0.0)
    .map(|row| DetectItem {
      class_id: row[5].round() as u32,
      score: row[4],
      bbox: [row[0], row[1], row[2], row[3]],
    })
    .collect::<Vec<_>>();
  debug!("置信度过滤后剩余 {} 个候选框", candidates.len());

  let mut items = non_max_suppression(candidates, params.iou_threshold);
  items.truncate(params.max_detections);
  items
}

/// 同类别非极大值抑制，不改变输入顺序
///
/// 输入应已按置信度降序排列，先出现的框优先保留。
pub fn non_max_suppression(candidates: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  let mut kept: Vec<DetectItem> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept.iter().any(|item| {
      item.class_id == candidate.class_id && iou(&item.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> InferParams {
    InferParams {
      confidence_threshold: 0.25,
      iou_threshold: 0.5,
      image_size: 640,
      max_detections: 300,
    }
  }

  #[test]
  fn letterbox_pads_the_short_side() {
    let image = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
    let (canvas, info) = letterbox(&image, 100);

    assert_eq!(canvas.dimensions(), (100, 100));
    assert_eq!(info.scale, 0.5);
    assert_eq!((info.pad_x, info.pad_y), (0.0, 25.0));
    assert_eq!(canvas.get_pixel(50, 0), &Rgb([PAD_VALUE; 3]));
    assert_eq!(canvas.get_pixel(50, 50), &Rgb([10, 20, 30]));
  }

  #[test]
  fn letterbox_with_zero_size_uses_one_pixel() {
    let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
    let (canvas, info) = letterbox(&image, 0);

    assert_eq!(canvas.dimensions(), (1, 1));
    assert_eq!(info.scale, 0.25);
  }

  #[test]
  fn restore_maps_back_and_clamps() {
    let info = Letterbox {
      scale: 0.5,
      pad_x: 0.0,
      pad_y: 25.0,
      width: 200,
      height: 100,
    };
    assert_eq!(info.restore([10.0, 35.0, 50.0, 75.0]), [20.0, 20.0, 100.0, 100.0]);
    assert_eq!(info.restore([-5.0, 0.0, 120.0, 90.0]), [0.0, 0.0, 200.0, 100.0]);
  }

  #[test]
  fn decode_filters_low_scores_and_keeps_order() {
    let output = [
      0.0, 0.0, 10.0, 10.0, 0.9, 1.0, //
      50.0, 50.0, 60.0, 60.0, 0.1, 0.0, //
      20.0, 20.0, 30.0, 30.0, 0.6, 0.0, //
    ];
    let items = decode_end2end(&output, &params());

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].class_id, 1);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[1].class_id, 0);
    assert_eq!(items[1].bbox, [20.0, 20.0, 30.0, 30.0]);
  }

  #[test]
  fn nms_only_suppresses_same_class() {
    let a = DetectItem { class_id: 0, score: 0.9, bbox: [0.0, 0.0, 10.0, 10.0] };
    let b = DetectItem { class_id: 0, score: 0.8, bbox: [1.0, 1.0, 10.0, 10.0] };
    let c = DetectItem { class_id: 1, score: 0.7, bbox: [1.0, 1.0, 10.0, 10.0] };

    let kept = non_max_suppression(vec![a.clone(), b, c.clone()], 0.5);
    assert_eq!(kept, vec![a, c]);
  }

  #[test]
  fn decode_caps_detection_count() {
    let output: Vec<f32> = (0..10)
      .flat_map(|i| {
        let x = i as f32 * 20.0;
        [x, 0.0, x + 10.0, 10.0, 0.9, 0.0]
      })
      .collect();
    let items = decode_end2end(&output, &InferParams { max_detections: 3, ..params() });

    assert_eq!(items.len(), 3);
    assert_eq!(items[2].bbox[0], 40.0);
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
  }
}
