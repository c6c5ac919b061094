// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # multipart/form-data 解码
//!
//! 底层请求自身的表单解析与 `MultiPartParser` 共用这里的实现。
//! 普通字段进入 [`QueryDict`]，带 `filename` 的部分进入 [`Files`]。

use bytes::Bytes;
use log::debug;

use crate::{
    datastructures::{decode_text, Files, QueryDict, UploadedFile},
    exception::Exception,
    mediatypes::parse_header_parameters,
};

/// RFC 2046 规定的边界最大长度
const MAX_BOUNDARY_LEN: usize = 70;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}

/// 从 `Content-Type` 中取出合法的边界字符串
pub fn boundary(content_type: &str) -> Result<String, Exception> {
    let (_, params) = parse_header_parameters(content_type);
    match params.get("boundary") {
        Some(b) if !b.is_empty() && b.len() <= MAX_BOUNDARY_LEN => Ok(b.clone()),
        Some(b) => Err(Exception::ParseError(format!(
            "Multipart form parse error - Invalid boundary in multipart: {}",
            b
        ))),
        None => Err(Exception::ParseError(
            "Multipart form parse error - Invalid boundary in multipart: None".to_string(),
        )),
    }
}

/// 解码完整的多部分表单请求体
pub fn parse_multipart(
    body: &[u8],
    content_type: &str,
    encoding: &str,
) -> Result<(QueryDict, Files), Exception> {
    let boundary = boundary(content_type)?;
    let delimiter = [b"--", boundary.as_bytes()].concat();
    let part_delimiter = [b"\r\n", delimiter.as_slice()].concat();

    let mut data = QueryDict::new(encoding);
    let mut files = Files::new();

    let mut pos = match find(body, &delimiter, 0) {
        Some(start) => start + delimiter.len(),
        None => return Ok((data, files)),
    };

    loop {
        // 结束标记 `--boundary--`
        if body[pos..].starts_with(b"--") {
            break;
        }
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let end = find(body, &part_delimiter, pos).ok_or_else(|| {
            Exception::ParseError(
                "Multipart form parse error - Unexpected end of body".to_string(),
            )
        })?;
        read_part(&body[pos..end], encoding, &mut data, &mut files);
        pos = end + part_delimiter.len();
    }

    debug!(
        "multipart解析完成：{}个字段，{}个文件",
        data.len(),
        files.len()
    );
    Ok((data, files))
}

fn read_part(part: &[u8], encoding: &str, data: &mut QueryDict, files: &mut Files) {
    let (head, content) = match find(part, HEADER_SEPARATOR, 0) {
        Some(i) => (&part[..i], &part[i + HEADER_SEPARATOR.len()..]),
        None => (part, &[][..]),
    };
    let head = String::from_utf8_lossy(head);

    let mut disposition = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_lowercase().as_str() {
                "content-disposition" => disposition = Some(parse_header_parameters(value)),
                "content-type" => content_type = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    // 没有字段名的部分直接忽略
    let params = match disposition {
        Some((kind, params)) if kind == "form-data" => params,
        _ => return,
    };
    let name = match params.get("name") {
        Some(name) => name,
        None => return,
    };

    match params.get("filename") {
        Some(file_name) if file_name.is_empty() => {}
        Some(file_name) => {
            let content_type = content_type.unwrap_or_else(|| "text/plain".to_string());
            let (base_type, type_params) = parse_header_parameters(&content_type);
            let file = UploadedFile::new(
                name,
                file_name,
                &base_type,
                type_params.get("charset").cloned(),
                Bytes::copy_from_slice(content),
            );
            files.append(name, file);
        }
        None => {
            // 部分自身声明的字符集优先
            let charset = content_type
                .as_deref()
                .map(parse_header_parameters)
                .and_then(|(_, params)| params.get("charset").cloned());
            let text = decode_text(content, charset.as_deref().unwrap_or(encoding));
            data.append(name, &text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_TYPE: &str = "multipart/form-data; boundary=XyZ";

    fn sample_body() -> Vec<u8> {
        [
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "hello world\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"notes.txt\"\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "line1\r\nline2\r\n",
            "--XyZ--\r\n",
        ]
        .concat()
        .into_bytes()
    }

    #[test]
    fn test_parse_fields_and_files() {
        let (data, files) = parse_multipart(&sample_body(), CONTENT_TYPE, "utf-8").unwrap();
        assert_eq!(data.get("title"), Some("hello world"));
        let doc = files.get("doc").unwrap();
        assert_eq!(doc.file_name(), "notes.txt");
        assert_eq!(doc.content_type(), "text/plain");
        assert_eq!(doc.charset(), Some("utf-8"));
        assert_eq!(doc.content().as_ref(), b"line1\r\nline2");
    }

    /// 文本字段按请求字符集解码，部分自身的 charset 优先
    #[test]
    fn test_text_fields_use_declared_charset() {
        let mut body = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n".to_vec();
        body.extend_from_slice(&[0xE9, b't', 0xE9]);
        body.extend_from_slice(b"\r\n--XyZ\r\nContent-Disposition: form-data; name=\"b\"\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n");
        body.extend_from_slice("été".as_bytes());
        body.extend_from_slice(b"\r\n--XyZ--\r\n");

        let (data, _) = parse_multipart(&body, CONTENT_TYPE, "latin-1").unwrap();
        assert_eq!(data.get("a"), Some("été"));
        assert_eq!(data.get("b"), Some("été"));
    }

    #[test]
    fn test_missing_boundary() {
        let result = parse_multipart(b"", "multipart/form-data", "utf-8");
        assert_eq!(
            result.unwrap_err(),
            Exception::ParseError(
                "Multipart form parse error - Invalid boundary in multipart: None".to_string()
            )
        );
    }

    #[test]
    fn test_truncated_body() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue";
        assert!(matches!(
            parse_multipart(body, CONTENT_TYPE, "utf-8"),
            Err(Exception::ParseError(_))
        ));
    }

    #[test]
    fn test_empty_filename_is_skipped() {
        let body = [
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"\"\r\n",
            "\r\n",
            "\r\n",
            "--XyZ--\r\n",
        ]
        .concat();
        let (data, files) = parse_multipart(body.as_bytes(), CONTENT_TYPE, "utf-8").unwrap();
        assert!(data.is_empty());
        assert!(files.is_empty());
    }

    #[test]
    fn test_body_without_delimiter_is_empty() {
        let (data, files) = parse_multipart(b"", CONTENT_TYPE, "utf-8").unwrap();
        assert!(data.is_empty());
        assert!(files.is_empty());
    }
}
