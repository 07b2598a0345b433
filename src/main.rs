// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/main.rs - 检测服务主程序
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

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use fengchao::{
  config::ServerConfig,
  detector::Detector,
  model::ModelLoader,
  server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
  fengchao::init_tracing();

  let config = ServerConfig::parse();

  info!("Fengchao 蜂群检测服务");
  info!("模型文件路径: {}", config.model.display());
  info!("置信度阈值: {}", config.confidence);
  info!("NMS 阈值: {}", config.iou_threshold);
  info!("推理分辨率: {}", config.image_size);
  info!("最大检测数: {}", config.max_detections);
  info!("类别表: {:?}", config.labels());

  #[cfg(feature = "rknpu")]
  return run(fengchao::model::RknnYoloLoader::new(config.labels()), config).await;

  #[cfg(not(feature = "rknpu"))]
  anyhow::bail!("未启用推理后端，请使用 `--features rknpu` 重新编译");
}

#[cfg_attr(not(feature = "rknpu"), allow(dead_code))]
async fn run<L: ModelLoader>(loader: L, config: ServerConfig) -> Result<()> {
  let detector = Arc::new(Detector::new(loader, config.resolved_weights()));

  if config.preload {
    info!("预加载模型...");
    let warm = Arc::clone(&detector);
    if let Err(e) = tokio::task::spawn_blocking(move || warm.warm_up()).await? {
      warn!("预加载失败，将在首次请求时重试: {}", e);
    }
  }

  let http = config.http();
  let state = AppState::new(detector, config.infer_params(), http.inference_timeout);
  let router = server::build_router(state, &http);

  let (listener, _) = server::bind(&config.host, config.port).await?;
  server::serve(listener, router, server::shutdown_signal()).await
}
