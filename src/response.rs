// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 响应构建模块
//!
//! 演示服务器使用的最小 HTTP 响应：状态行、常用标头以及 JSON 响应体。

use bytes::Bytes;
use chrono::prelude::*;
use log::error;
use serde_json::{json, Value};

use crate::{exception::Exception, param::*};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    date: DateTime<Utc>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    www_authenticate: Option<String>,
    content: Option<Bytes>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            allow: None,
            www_authenticate: None,
            content: None,
        }
    }

    /// 以 JSON 作为响应体
    pub fn from_json(code: u16, value: &Value) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some(format!("{};charset={}", JSON_MEDIA_TYPE, DEFAULT_CHARSET));
        response.content = Some(Bytes::from(value.to_string()));
        response
    }

    /// 将异常转换为 `{"detail": ...}` 形式的错误响应
    pub fn from_exception(e: &Exception) -> Self {
        Self::from_json(e.status_code(), &json!({ "detail": e.to_string() }))
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        let (code, information) = match STATUS_CODES.get(&code) {
            Some(&information) => (code, information),
            None => {
                error!("非法的状态码：{}，按500处理。", code);
                (500, "Internal Server Error")
            }
        };
        self.status_code = code;
        self.information = information.to_string();
        self
    }

    pub fn set_version(&mut self, version: HttpVersion) -> &mut Self {
        self.version = version;
        self
    }

    pub fn set_allow(&mut self, allow: Vec<HttpRequestMethod>) -> &mut Self {
        self.allow = Some(allow);
        self
    }

    pub fn set_www_authenticate(&mut self, value: Option<String>) -> &mut Self {
        self.www_authenticate = value;
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let content: &[u8] = match &self.content {
            Some(c) => c,
            None => b"",
        };
        let mut header = format!(
            "HTTP/{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        header.push_str(&format!("Content-Length: {}{}", content.len(), CRLF));
        header.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        if let Some(allow) = &self.allow {
            let allow: Vec<String> = allow.iter().map(|m| m.to_string()).collect();
            header.push_str(&["Allow: ", &allow.join(", "), CRLF].concat());
        }
        if let Some(value) = &self.www_authenticate {
            header.push_str(&["WWW-Authenticate: ", value, CRLF].concat());
        }
        header.push_str(CRLF);
        [header.as_bytes(), content].concat()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
