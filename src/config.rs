// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/config.rs - 服务参数配置
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
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::model::InferParams;

pub const DEFAULT_WEIGHTS: &str = "project_beedetection/yolov10x_augm_pat30/weights/best.rknn";
pub const DEFAULT_PORT: u16 = 8751;

/// Fengchao 服务参数配置
///
/// 所有参数都可以通过同名环境变量覆盖。
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
  /// 监听地址
  #[arg(long, env = "HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
  pub port: u16,

  /// 模型权重文件路径
  #[arg(long, env = "MODEL_WEIGHTS", default_value = DEFAULT_WEIGHTS, value_name = "FILE")]
  pub model: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long = "conf", env = "CONF_THRESHOLD", default_value_t = 0.25, value_parser = unit_interval)]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long = "iou", env = "IOU_THRESHOLD", default_value_t = 0.7, value_parser = unit_interval)]
  pub iou_threshold: f32,

  /// 推理分辨率
  #[arg(
    long = "imgsz",
    env = "IMG_SIZE",
    default_value_t = 1280,
    value_parser = clap::value_parser!(u32).range(1..)
  )]
  pub image_size: u32,

  /// 单张图像最大检测数
  #[arg(long = "max-det", env = "MAX_DETECTIONS", default_value_t = 300)]
  pub max_detections: usize,

  /// 类别名称表，按类别索引排列，逗号分隔
  #[arg(long, env = "CLASS_LABELS", value_delimiter = ',', default_value = "worker,drone")]
  pub labels: Vec<String>,

  /// 请求体大小上限 (MB)
  #[arg(long, env = "BODY_LIMIT_MB", default_value_t = 64)]
  pub body_limit_mb: usize,

  /// 单个请求的总超时 (秒)
  #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 300)]
  pub request_timeout_secs: u64,

  /// 单次推理超时 (秒)
  #[arg(long, env = "INFERENCE_TIMEOUT_SECS", default_value_t = 120)]
  pub inference_timeout_secs: u64,

  /// 启动时立即加载模型
  #[arg(long, env = "PRELOAD_MODEL")]
  pub preload: bool,
}

/// HTTP 层配置
#[derive(Debug, Clone)]
pub struct HttpConfig {
  pub body_limit: usize,
  pub request_timeout: Duration,
  pub inference_timeout: Duration,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      body_limit: 64 * 1024 * 1024,
      request_timeout: Duration::from_secs(300),
      inference_timeout: Duration::from_secs(120),
    }
  }
}

impl ServerConfig {
  pub fn infer_params(&self) -> InferParams {
    InferParams {
      confidence_threshold: self.confidence,
      iou_threshold: self.iou_threshold,
      image_size: self.image_size,
      max_detections: self.max_detections,
    }
  }

  pub fn http(&self) -> HttpConfig {
    HttpConfig {
      body_limit: self.body_limit_mb.saturating_mul(1024 * 1024),
      request_timeout: Duration::from_secs(self.request_timeout_secs),
      inference_timeout: Duration::from_secs(self.inference_timeout_secs),
    }
  }

  /// 权重文件不存在时回退到默认路径
  pub fn resolved_weights(&self) -> PathBuf {
    if self.model.exists() {
      return self.model.clone();
    }
    let fallback = PathBuf::from(DEFAULT_WEIGHTS);
    if self.model != fallback {
      warn!(
        "权重文件 {} 不存在，回退到默认路径 {}",
        self.model.display(),
        fallback.display()
      );
    }
    fallback
  }

  pub fn labels(&self) -> Vec<String> {
    self
      .labels
      .iter()
      .map(|label| label.trim().to_string())
      .collect()
  }
}

fn unit_interval(s: &str) -> Result<f32, String> {
  let value: f32 = s.parse().map_err(|e| format!("{}", e))?;
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(format!("{} 不在 0.0 - 1.0 范围内", value))
  }
}
