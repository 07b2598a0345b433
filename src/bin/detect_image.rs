// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/bin/detect_image.rs - 单张图像离线检测
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use fengchao::{
  config::DEFAULT_WEIGHTS,
  detector::{DetectImage, Detector},
  model::{InferParams, RknnYoloLoader},
  server::DetectionResponse,
};

/// 对单张图像运行蜂群检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 图像文件路径
  #[arg(value_name = "IMAGE")]
  pub image: PathBuf,

  /// 模型权重文件路径
  #[arg(long, default_value = DEFAULT_WEIGHTS, value_name = "FILE")]
  pub model: PathBuf,

  /// 推理分辨率
  #[arg(long, default_value_t = 1280, value_parser = clap::value_parser!(u32).range(1..))]
  pub imgsz: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25)]
  pub conf: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.7)]
  pub iou: f32,

  /// 最大检测数
  #[arg(long = "max-det", default_value_t = 300)]
  pub max_det: usize,

  /// 类别名称表
  #[arg(long, value_delimiter = ',', default_value = "worker,drone")]
  pub labels: Vec<String>,

  /// 以 JSON 输出
  #[arg(long)]
  pub json: bool,
}

fn main() -> Result<()> {
  fengchao::init_tracing();

  let args = Args::parse();

  anyhow::ensure!(
    args.model.exists(),
    "模型权重不存在: {}",
    args.model.display()
  );
  let image = std::fs::read(&args.image)
    .with_context(|| format!("无法读取图像: {}", args.image.display()))?;

  info!("模型文件路径: {}", args.model.display());
  info!("图像: {}", args.image.display());
  info!("推理分辨率: {}, 置信度阈值: {}", args.imgsz, args.conf);

  let params = InferParams {
    confidence_threshold: args.conf,
    iou_threshold: args.iou,
    image_size: args.imgsz,
    max_detections: args.max_det,
  };
  let detector = Detector::new(RknnYoloLoader::new(args.labels), &args.model);

  let now = std::time::Instant::now();
  let detections = detector.detect(&image, &params)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  let response = DetectionResponse::from_detections(detections);
  if args.json {
    println!("{}", serde_json::to_string_pretty(&response)?);
    return Ok(());
  }

  println!("=== 检测结果 ===");
  println!("图像: {}", args.image.display());
  if response.result.is_empty() {
    println!("未检测到目标。");
    return Ok(());
  }

  println!("共检测到 {} 个目标:", response.count);
  for (i, det) in response.result.iter().enumerate() {
    println!("  [{}] {}", i + 1, det.class_name);
    println!("      置信度: {:.3}", det.confidence);
    println!(
      "      边界框: x1={:.1}, y1={:.1}, x2={:.1}, y2={:.1}",
      det.x1, det.y1, det.x2, det.y2
    );
  }
  println!("工蜂: {}, 雄蜂: {}", response.worker_count, response.drone_count);

  Ok(())
}
