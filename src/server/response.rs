// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/server/response.rs - 响应与错误定义
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

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::detector::DetectionRecord;
use crate::multipart::MultipartError;

pub const WORKER_CLASS: &str = "worker";
pub const DRONE_CLASS: &str = "drone";

const MESSAGE_SUCCESS: &str = "File processed successfully";
const MESSAGE_EMPTY: &str = "No bees detected";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  #[error("Unsupported content type. Please use multipart/form-data.")]
  UnsupportedContentType,
  #[error("Missing boundary in multipart/form-data")]
  MissingBoundary,
  #[error("Empty request body")]
  EmptyBody,
  #[error("Missing 'file' field in form data")]
  MissingFileField,
  #[error("Failed to read request body: {0}")]
  BodyRead(String),
  #[error("Failed to decode image: {0}")]
  Decode(String),
  #[error("Detection failed: {0}")]
  Engine(String),
  #[error("Internal server error: {0}")]
  Internal(String),
  #[error("Request body too large")]
  PayloadTooLarge,
  #[error("Request timed out")]
  RequestTimeout,
  #[error("{}", .0.canonical_reason().unwrap_or("Request failed"))]
  Status(StatusCode),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
      ApiError::MissingBoundary
      | ApiError::EmptyBody
      | ApiError::MissingFileField
      | ApiError::BodyRead(_) => StatusCode::BAD_REQUEST,
      ApiError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Engine(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
      ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
      ApiError::Status(status) => *status,
    }
  }

  /// 由中间件直接产生的错误状态
  pub fn from_status(status: StatusCode) -> Self {
    match status {
      StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
      StatusCode::REQUEST_TIMEOUT => ApiError::RequestTimeout,
      status => ApiError::Status(status),
    }
  }
}

impl From<MultipartError> for ApiError {
  fn from(err: MultipartError) -> Self {
    match err {
      MultipartError::MissingFileField => ApiError::MissingFileField,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
  }
}

/// 把非 JSON 的错误响应改写为 `{"message": ...}`
///
/// 请求体超限、请求超时与不支持的方法由中间件或路由直接返回，
/// 这里统一补上 JSON 消息体。
pub async fn json_error_envelope(response: Response) -> Response {
  let status = response.status();
  if !(status.is_client_error() || status.is_server_error()) {
    return response;
  }
  let is_json = response
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .is_some_and(|value| value.starts_with("application/json"));
  if is_json {
    return response;
  }
  ApiError::from_status(status).into_response()
}

/// 各类别计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassTally {
  pub workers: usize,
  pub drones: usize,
}

impl ClassTally {
  /// 按类别名称精确匹配计数，其它类别不计入
  pub fn count(detections: &[DetectionRecord]) -> Self {
    detections
      .iter()
      .fold(Self::default(), |mut tally, record| {
        match record.class_name.as_str() {
          WORKER_CLASS => tally.workers += 1,
          DRONE_CLASS => tally.drones += 1,
          _ => {}
        }
        tally
      })
  }
}

/// 检测成功时的响应体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResponse {
  pub message: &'static str,
  pub result: Vec<DetectionRecord>,
  pub count: usize,
  pub worker_count: usize,
  pub drone_count: usize,
}

impl DetectionResponse {
  pub fn from_detections(detections: Vec<DetectionRecord>) -> Self {
    let tally = ClassTally::count(&detections);
    Self {
      message: if detections.is_empty() {
        MESSAGE_EMPTY
      } else {
        MESSAGE_SUCCESS
      },
      count: detections.len(),
      worker_count: tally.workers,
      drone_count: tally.drones,
      result: detections,
    }
  }
}
