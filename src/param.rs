// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了请求门面（Request facade）遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 表单类媒体类型（Form Media Type）常量。
//! - HTTP 方法、版本的强类型枚举。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::exception::Exception;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "api-request-echo";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 当请求本身与配置都没有给出字符集时使用的最终兜底编码
pub const DEFAULT_CHARSET: &str = "utf-8";

/// URL 编码表单的媒体类型
pub const URLENCODED_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// 多部分表单（文件上传）的媒体类型
pub const MULTIPART_MEDIA_TYPE: &str = "multipart/form-data";

/// JSON 的媒体类型
pub const JSON_MEDIA_TYPE: &str = "application/json";

lazy_static! {
    /// 需要拆分字段与文件的表单类媒体类型。
    ///
    /// 解析结果属于这些类型时，门面会把 data/files 回写到底层请求的 POST/FILES 缓存上。
    pub static ref FORM_MEDIA_TYPES: Vec<&'static str> =
        vec![URLENCODED_MEDIA_TYPE, MULTIPART_MEDIA_TYPE];
}

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(204, "No Content");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(413, "Content Too Large");
        map.insert(415, "Unsupported Media Type");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 获取资源的元数据（不包含响应体）
    Head,
    /// 查询服务器支持的选项
    Options,
    /// 提交数据或执行操作
    Post,
    /// 整体替换资源
    Put,
    /// 局部更新资源
    Patch,
    /// 删除资源
    Delete,
}

impl HttpRequestMethod {
    /// 所有受支持的方法，按常见程度排列。
    pub const ALL: [HttpRequestMethod; 7] = [
        HttpRequestMethod::Get,
        HttpRequestMethod::Head,
        HttpRequestMethod::Options,
        HttpRequestMethod::Post,
        HttpRequestMethod::Put,
        HttpRequestMethod::Patch,
        HttpRequestMethod::Delete,
    ];

    /// 是否为“安全”方法（不修改服务器状态）
    pub fn is_safe(&self) -> bool {
        matches!(
            self,
            HttpRequestMethod::Get | HttpRequestMethod::Head | HttpRequestMethod::Options
        )
    }
}

impl FromStr for HttpRequestMethod {
    type Err = Exception;

    /// 方法名大小写不敏感
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpRequestMethod::Get),
            "HEAD" => Ok(HttpRequestMethod::Head),
            "OPTIONS" => Ok(HttpRequestMethod::Options),
            "POST" => Ok(HttpRequestMethod::Post),
            "PUT" => Ok(HttpRequestMethod::Put),
            "PATCH" => Ok(HttpRequestMethod::Patch),
            "DELETE" => Ok(HttpRequestMethod::Delete),
            _ => Err(Exception::UnSupportedRequestMethod),
        }
    }
}

impl FromStr for HttpVersion {
    type Err = Exception;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HTTP/1.0" => Ok(HttpVersion::V1_0),
            "HTTP/1.1" => Ok(HttpVersion::V1_1),
            _ => Err(Exception::UnsupportedHttpVersion),
        }
    }
}

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "1.0"),
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
            HttpRequestMethod::Put => write!(f, "PUT"),
            HttpRequestMethod::Patch => write!(f, "PATCH"),
            HttpRequestMethod::Delete => write!(f, "DELETE"),
        }
    }
}
