// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::routing::get;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::{RequestBodyLimitLayer, ResponseBody};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::HttpConfig;
use crate::detector::DetectImage;
use crate::model::InferParams;

mod dispatch;
mod page;
mod response;

pub use self::dispatch::{detect_upload, index_page};
pub use self::response::{ApiError, ClassTally, DetectionResponse, json_error_envelope};

/// 各请求共享的只读状态
#[derive(Clone)]
pub struct AppState {
  pub detector: Arc<dyn DetectImage>,
  pub params: InferParams,
  pub inference_timeout: Duration,
}

impl AppState {
  pub fn new(detector: Arc<dyn DetectImage>, params: InferParams, inference_timeout: Duration) -> Self {
    Self {
      detector,
      params,
      inference_timeout,
    }
  }
}

/// 组装路由
///
/// - `GET /` 静态表单页面
/// - `POST /` 上传图像并返回检测结果
pub fn build_router(state: AppState, config: &HttpConfig) -> Router {
  let layers = ServiceBuilder::new()
    .layer(TraceLayer::new_for_http())
    .layer(middleware::map_response(json_error_envelope))
    .map_response(|response: Response<ResponseBody<Body>>| response.map(Body::new))
    .layer(RequestBodyLimitLayer::new(config.body_limit))
    .layer(TimeoutLayer::with_status_code(
      StatusCode::REQUEST_TIMEOUT,
      config.request_timeout,
    ));

  Router::new()
    .route("/", get(index_page).post(detect_upload))
    .layer(layers)
    .with_state(state)
}

/// 绑定监听端口，返回实际端口
pub async fn bind(host: &str, port: u16) -> anyhow::Result<(TcpListener, u16)> {
  let listener = TcpListener::bind((host, port)).await?;
  let port = listener.local_addr()?.port();
  info!("服务监听于 {}:{}", host, port);
  Ok((listener, port))
}

/// 接受连接直到收到关闭信号
///
/// 每个连接由独立的任务处理，推理在阻塞线程池中执行，互不影响。
pub async fn serve(
  listener: TcpListener,
  router: Router,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown)
    .await?;
  info!("服务已停止");
  Ok(())
}

/// Ctrl-C 或 SIGTERM
pub async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("无法监听 Ctrl-C: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::error!("无法监听 SIGTERM: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!("收到中断信号，准备退出...");
}
