// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了请求门面在解析请求、协商内容、认证身份过程中可能抛出的各类异常情况。
//!
//! ## 分类
//! - **协议错误**：原始请求无法解析（编码、方法、版本）。
//! - **API 异常**：`UnsupportedMediaType`、`ParseError`、`AuthenticationFailed`、
//!   `NotAuthenticated`。它们会被转换成对应的 HTTP 状态码返回给客户端，
//!   认证器抛出这类异常时门面会先把请求标记为未认证。
//! - **底层错误**：请求体已被消费（`RawPostData`）、I/O 失败、属性不存在、配置错误。

use std::fmt;

/// 门面处理请求过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 请求头部字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行格式错误，或使用了不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 没有任何解析器能处理请求声明的媒体类型，携带该媒体类型。对应 `415`。
    UnsupportedMediaType(String),
    /// 解析器解码请求体失败。对应 `400`。
    ParseError(String),
    /// 认证器拒绝了请求携带的凭据。对应 `401`。
    AuthenticationFailed(String),
    /// 请求没有携带任何凭据。对应 `401`。
    NotAuthenticated,
    /// 请求体的数据流已经被读取过，且没有被缓冲下来，无法再次访问。
    RawPostData,
    /// 门面和底层请求上都不存在该属性。
    NoSuchAttribute {
        type_name: &'static str,
        attr: String,
    },
    /// 读取请求体时发生的 I/O 错误。
    Io(String),
    /// 配置文件无法读取。
    Config(String),
}

use Exception::*;

impl Exception {
    /// 是否属于 API 层异常。
    ///
    /// 只有 API 异常会在认证阶段触发“先标记未认证再抛出”的处理。
    pub fn is_api_exception(&self) -> bool {
        matches!(
            self,
            UnsupportedMediaType(_) | ParseError(_) | AuthenticationFailed(_) | NotAuthenticated
        )
    }

    /// 该异常对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | UnSupportedRequestMethod | ParseError(_) => 400,
            UnsupportedHttpVersion => 505,
            UnsupportedMediaType(_) => 415,
            AuthenticationFailed(_) | NotAuthenticated => 401,
            RawPostData | NoSuchAttribute { .. } | Io(_) | Config(_) => 500,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            UnsupportedMediaType(media_type) => {
                write!(f, "Unsupported media type \"{}\" in request.", media_type)
            }
            ParseError(detail) => write!(f, "{}", detail),
            AuthenticationFailed(detail) => write!(f, "{}", detail),
            NotAuthenticated => write!(f, "Authentication credentials were not provided."),
            RawPostData => write!(
                f,
                "You cannot access body after reading from request's data stream"
            ),
            NoSuchAttribute { type_name, attr } => {
                write!(f, "'{}' object has no attribute '{}'", type_name, attr)
            }
            Io(detail) => write!(f, "I/O error while reading request: {}", detail),
            Config(detail) => write!(f, "Invalid configuration: {}", detail),
        }
    }
}

impl std::error::Error for Exception {}

impl From<std::io::Error> for Exception {
    fn from(e: std::io::Error) -> Self {
        Io(e.to_string())
    }
}
