// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/server/dispatch.rs - 请求处理
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

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Html;
use tracing::{debug, error, info, warn};

use super::page::INDEX_PAGE;
use super::response::{ApiError, DetectionResponse};
use super::AppState;
use crate::detector::{DetectError, DetectionRecord};
use crate::multipart;

pub async fn index_page() -> Html<&'static str> {
  Html(INDEX_PAGE)
}

/// 处理图像上传
///
/// 依次检查 Content-Type、boundary、Content-Length，读取请求体，
/// 取出 `file` 字段后交给检测引擎，最后汇总各类别数量。
pub async fn detect_upload(
  State(state): State<AppState>,
  request: Request,
) -> Result<Json<DetectionResponse>, ApiError> {
  info!("收到 POST 请求");
  let (parts, body) = request.into_parts();

  let content_type = header_str(&parts.headers, CONTENT_TYPE).unwrap_or_default();
  debug!("Content-Type: {}", content_type);
  if !multipart::is_multipart(content_type) {
    warn!("不支持的 Content-Type: {}", content_type);
    return Err(ApiError::UnsupportedContentType);
  }

  let boundary = multipart::boundary(content_type).ok_or_else(|| {
    warn!("Content-Type 中缺少 boundary");
    ApiError::MissingBoundary
  })?;
  debug!("Boundary: {}", boundary);

  let content_length = header_str(&parts.headers, CONTENT_LENGTH)
    .and_then(|value| value.trim().parse::<usize>().ok())
    .unwrap_or(0);
  debug!("Content-Length: {}", content_length);
  if content_length == 0 {
    warn!("请求体为空");
    return Err(ApiError::EmptyBody);
  }

  let body = axum::body::to_bytes(body, content_length)
    .await
    .map_err(|e| {
      warn!("读取请求体失败: {}", e);
      ApiError::BodyRead(e.to_string())
    })?;
  info!("读取请求体 {} 字节", body.len());

  let file = multipart::extract_file(&body, boundary).map_err(|e| {
    warn!("表单中没有文件字段");
    ApiError::from(e)
  })?;
  info!(
    "文件字段: filename={:?}, size={} 字节 ({:.2} MB)",
    file.filename,
    file.data.len(),
    file.data.len() as f64 / (1024.0 * 1024.0)
  );
  if let [a, b, ..] = file.data {
    debug!("图像魔数: {:02x}{:02x}", a, b);
  }

  let image = body.slice_ref(file.data);
  let detections = run_detection(&state, image).await?;

  let response = DetectionResponse::from_detections(detections);
  info!(
    "检测完成: 总数 {}, 工蜂 {}, 雄蜂 {}",
    response.count, response.worker_count, response.drone_count
  );
  Ok(Json(response))
}

async fn run_detection(
  state: &AppState,
  image: Bytes,
) -> Result<Vec<DetectionRecord>, ApiError> {
  let detector = Arc::clone(&state.detector);
  let params = state.params;
  debug!("开始检测: {:?}", params);

  let task = tokio::task::spawn_blocking(move || detector.detect(&image, &params));
  match tokio::time::timeout(state.inference_timeout, task).await {
    Err(_) => {
      error!("推理超时: {:.2?}", state.inference_timeout);
      Err(ApiError::Engine("inference timed out".to_string()))
    }
    Ok(Err(e)) => {
      error!("推理任务异常退出: {}", e);
      Err(ApiError::Internal(e.to_string()))
    }
    Ok(Ok(Err(DetectError::Decode(e)))) => Err(ApiError::Decode(e.to_string())),
    Ok(Ok(Err(DetectError::Engine(e)))) => Err(ApiError::Engine(e.to_string())),
    Ok(Ok(Ok(detections))) => Ok(detections),
  }
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<&str> {
  headers.get(name).and_then(|value| value.to_str().ok())
}
