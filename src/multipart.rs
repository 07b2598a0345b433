// 该文件是 Fengchao （蜂巢） 项目的一部分。
// src/multipart.rs - multipart/form-data 字节级解析
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

use thiserror::Error;
use tracing::debug;

/// 上传图像所在的表单字段名
pub const FILE_FIELD: &str = "file";

/// 小于该长度的分段视为前导或结束标记，直接忽略
const MIN_PART_LEN: usize = 10;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// 数据段尾部可能残留的结束标记，按顺序尝试，最多去除一个
const TRAILERS: [&[u8]; 3] = [b"--\r\n", b"\r\n", b"--"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
  #[error("Missing 'file' field in form data")]
  MissingFileField,
}

/// 从请求体中取出的文件字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFile<'a> {
  /// 文件数据，借用自原始请求体
  pub data: &'a [u8],
  /// 可选的文件名
  pub filename: Option<String>,
}

/// 判断 `Content-Type` 是否为 multipart/form-data
pub fn is_multipart(content_type: &str) -> bool {
  content_type
    .trim_start()
    .get(..19)
    .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/form-data"))
}

/// 从 `Content-Type` 中提取 boundary 参数
///
/// 值为空时返回 `None`。两端成对的双引号会被去掉，其余字符原样保留。
pub fn boundary(content_type: &str) -> Option<&str> {
  content_type.split(';').find_map(|param| {
    let (key, value) = param.trim().split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("boundary") {
      return None;
    }
    let value = value.trim();
    let value = value
      .strip_prefix('"')
      .and_then(|v| v.strip_suffix('"'))
      .unwrap_or(value);
    (!value.is_empty()).then_some(value)
  })
}

/// 解析请求体，返回第一个名为 `file` 的字段
pub fn extract_file<'a>(body: &'a [u8], boundary: &str) -> Result<FormFile<'a>, MultipartError> {
  let delimiter = [&b"--"[..], boundary.as_bytes()].concat();

  for (index, part) in split_bytes(body, &delimiter).enumerate() {
    if part.len() < MIN_PART_LEN {
      continue;
    }

    let Some(header_end) = find_bytes(part, HEADER_SEPARATOR) else {
      debug!("分段 {} 缺少头部分隔符，跳过", index);
      continue;
    };

    let headers = String::from_utf8_lossy(&part[..header_end]);
    let Some(filename) = file_field_filename(&headers) else {
      continue;
    };

    let data = strip_trailer(&part[header_end + HEADER_SEPARATOR.len()..]);
    debug!(
      "分段 {} 为文件字段: filename={:?}, size={}",
      index,
      filename,
      data.len()
    );
    return Ok(FormFile { data, filename });
  }

  Err(MultipartError::MissingFileField)
}

/// 若头部声明了文件字段，返回其文件名（可能不存在）
fn file_field_filename(headers: &str) -> Option<Option<String>> {
  for line in headers.lines() {
    let Some((name, value)) = line.split_once(':') else {
      continue;
    };
    if !name.trim().eq_ignore_ascii_case("content-disposition") {
      continue;
    }

    let mut field_name = None;
    let mut filename = None;
    for param in split_params(value).skip(1) {
      let Some((key, value)) = param.trim().split_once('=') else {
        continue;
      };
      let key = key.trim();
      if key.eq_ignore_ascii_case("name") {
        field_name = Some(unquote(value));
      } else if key.eq_ignore_ascii_case("filename") {
        filename = Some(unquote(value).to_string());
      }
    }

    if let Some(field_name) = field_name {
      return field_name
        .eq_ignore_ascii_case(FILE_FIELD)
        .then_some(filename);
    }
  }
  None
}

/// 按 `;` 切分头部参数，引号内的 `;` 不切分
fn split_params(value: &str) -> impl Iterator<Item = &str> {
  let mut rest = Some(value);
  std::iter::from_fn(move || {
    let current = rest?;
    let mut quote = None;
    for (pos, c) in current.char_indices() {
      match (quote, c) {
        (None, '"' | '\'') => quote = Some(c),
        (Some(q), c) if c == q => quote = None,
        (None, ';') => {
          rest = Some(&current[pos + 1..]);
          return Some(&current[..pos]);
        }
        _ => {}
      }
    }
    rest = None;
    Some(current)
  })
}

/// 去掉成对的单引号或双引号
fn unquote(value: &str) -> &str {
  let value = value.trim();
  for quote in ['"', '\''] {
    if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
      return inner;
    }
  }
  value
}

fn strip_trailer(data: &[u8]) -> &[u8] {
  TRAILERS
    .iter()
    .find_map(|trailer| data.strip_suffix(*trailer))
    .unwrap_or(data)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  if needle.is_empty() || haystack.len() < needle.len() {
    return None;
  }
  haystack
    .windows(needle.len())
    .position(|window| window == needle)
}

/// 按分隔符切分字节序列，行为与不重叠的从左到右切分一致
fn split_bytes<'a, 'd>(
  haystack: &'a [u8],
  delimiter: &'d [u8],
) -> impl Iterator<Item = &'a [u8]> + use<'a, 'd> {
  let mut rest = Some(haystack);
  std::iter::from_fn(move || {
    let current = rest?;
    match find_bytes(current, delimiter) {
      Some(pos) => {
        rest = Some(&current[pos + delimiter.len()..]);
        Some(&current[..pos])
      }
      None => {
        rest = None;
        Some(current)
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

  fn form(boundary: &str, disposition: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Disposition: form-data; {}\r\n", disposition).as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
  }

  fn image_like_bytes() -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    data.extend((0..=255u8).cycle().take(2048));
    data
  }

  #[test]
  fn returns_uploaded_bytes_untouched() {
    let data = image_like_bytes();
    let body = form(BOUNDARY, r#"name="file"; filename="bees.png""#, &data);

    let file = extract_file(&body, BOUNDARY).unwrap();
    assert_eq!(file.data, &data[..]);
    assert_eq!(file.filename.as_deref(), Some("bees.png"));
  }

  #[test]
  fn file_outlives_boundary_string() {
    let data = image_like_bytes();
    let body = form(BOUNDARY, r#"name="file""#, &data);

    let file = {
      let boundary = String::from(BOUNDARY);
      extract_file(&body, &boundary).unwrap()
    };
    assert_eq!(file.data, &data[..]);
  }

  #[test]
  fn semicolon_inside_quoted_filename_is_kept() {
    let data = image_like_bytes();
    let body = form(BOUNDARY, r#"name="file"; filename="a;b.png""#, &data);

    let file = extract_file(&body, BOUNDARY).unwrap();
    assert_eq!(file.filename.as_deref(), Some("a;b.png"));
    assert_eq!(file.data, &data[..]);
  }

  #[test]
  fn header_params_split_outside_quotes() {
    let params: Vec<&str> = split_params(r#"form-data; name="file"; filename='x;y'"#).collect();
    assert_eq!(params, ["form-data", r#" name="file""#, " filename='x;y'"]);
  }

  #[test]
  fn name_attribute_quoting_styles_are_equivalent() {
    let data = image_like_bytes();
    let variants = [r#"name="file""#, "name='file'", "name=file"];

    for disposition in variants {
      let body = form(BOUNDARY, disposition, &data);
      let file = extract_file(&body, BOUNDARY).unwrap();
      assert_eq!(file.data, &data[..], "disposition: {}", disposition);
      assert_eq!(file.filename, None);
    }
  }

  #[test]
  fn filename_quoting_styles_are_recognized() {
    let data = image_like_bytes();
    for (disposition, expected) in [
      (r#"name="file"; filename="a.jpg""#, "a.jpg"),
      ("name='file'; filename='b.jpg'", "b.jpg"),
      ("name=file; filename=c.jpg", "c.jpg"),
    ] {
      let body = form(BOUNDARY, disposition, &data);
      let file = extract_file(&body, BOUNDARY).unwrap();
      assert_eq!(file.filename.as_deref(), Some(expected));
    }
  }

  #[test]
  fn header_names_are_case_insensitive() {
    let data = image_like_bytes();
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"content-disposition: form-data; NAME=\"FILE\"\r\n\r\n");
    body.extend_from_slice(&data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    assert_eq!(extract_file(&body, BOUNDARY).unwrap().data, &data[..]);
  }

  #[test]
  fn filename_attribute_does_not_count_as_name() {
    let body = form(BOUNDARY, r#"name="upload"; filename="file""#, b"0123456789abcdef");
    assert_eq!(
      extract_file(&body, BOUNDARY),
      Err(MultipartError::MissingFileField)
    );
  }

  #[test]
  fn missing_file_field_is_reported() {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"comment\"\r\n\r\n");
    body.extend_from_slice(b"a note about the hive");
    body.extend_from_slice(format!("\r\n--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"hive\"\r\n\r\n7");
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    assert_eq!(
      extract_file(&body, BOUNDARY),
      Err(MultipartError::MissingFileField)
    );
  }

  #[test]
  fn first_file_field_wins() {
    let mut body = form(BOUNDARY, r#"name="file""#, b"first-payload");
    // 去掉结束标记后追加第二个同名字段
    body.truncate(body.len() - (BOUNDARY.len() + 6));
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"\r\n\r\n");
    body.extend_from_slice(b"second-payload");
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    assert_eq!(extract_file(&body, BOUNDARY).unwrap().data, b"first-payload");
  }

  #[test]
  fn parts_without_header_separator_are_skipped() {
    let data = image_like_bytes();
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"\r\nno blank line here\r\n");
    body.extend_from_slice(&form(BOUNDARY, r#"name="file""#, &data));

    assert_eq!(extract_file(&body, BOUNDARY).unwrap().data, &data[..]);
  }

  #[test]
  fn short_parts_are_ignored() {
    let body = format!("--{b}\r\nshort\r\n--{b}--\r\n", b = BOUNDARY);
    assert_eq!(
      extract_file(body.as_bytes(), BOUNDARY),
      Err(MultipartError::MissingFileField)
    );
  }

  #[test]
  fn boundary_is_matched_literally() {
    let boundary = "a.b*c+d?(e)[f]";
    let data = image_like_bytes();
    let body = form(boundary, r#"name="file""#, &data);

    assert_eq!(extract_file(&body, boundary).unwrap().data, &data[..]);
    assert_ne!(
      extract_file(&body, "a.b.c+d?(e)[f]").map(|file| file.data),
      Ok(&data[..])
    );
  }

  #[test]
  fn invalid_utf8_in_headers_is_tolerated() {
    let data = image_like_bytes();
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"X-Noise: \xff\xfe\xfd\r\n");
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"\xe8\x9c\x82.png\"\r\n\r\n");
    body.extend_from_slice(&data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let file = extract_file(&body, BOUNDARY).unwrap();
    assert_eq!(file.data, &data[..]);
    assert_eq!(file.filename.as_deref(), Some("蜂.png"));
  }

  #[test]
  fn decoding_is_idempotent() {
    let data = image_like_bytes();
    let body = form(BOUNDARY, r#"name="file"; filename="x.png""#, &data);

    let first = extract_file(&body, BOUNDARY).unwrap();
    let second = extract_file(&body, BOUNDARY).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn trailer_is_stripped_at_most_once() {
    assert_eq!(strip_trailer(b"abc--\r\n"), b"abc");
    assert_eq!(strip_trailer(b"abc\r\n\r\n"), b"abc\r\n");
    assert_eq!(strip_trailer(b"abc----"), b"abc--");
    assert_eq!(strip_trailer(b"abc"), b"abc");
  }

  #[test]
  fn split_matches_left_to_right_non_overlapping() {
    let parts: Vec<&[u8]> = split_bytes(b"--x--x--xa--x", b"--x").collect();
    assert_eq!(parts, vec![&b""[..], b"", b"", b"a", b""]);
  }

  #[test]
  fn multipart_content_type_detection() {
    assert!(is_multipart("multipart/form-data; boundary=abc"));
    assert!(is_multipart("Multipart/Form-Data;boundary=abc"));
    assert!(!is_multipart("application/json"));
    assert!(!is_multipart(""));
    assert!(!is_multipart("multipart/mixed; boundary=abc"));
  }

  #[test]
  fn boundary_extraction() {
    assert_eq!(boundary("multipart/form-data; boundary=abc123"), Some("abc123"));
    assert_eq!(boundary("multipart/form-data;boundary=\"q u\""), Some("q u"));
    assert_eq!(boundary("multipart/form-data; charset=utf-8; boundary=x=y"), Some("x=y"));
    assert_eq!(boundary("multipart/form-data"), None);
    assert_eq!(boundary("multipart/form-data; boundary="), None);
  }
}
