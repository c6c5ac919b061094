// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 底层 HTTP 请求模块
//!
//! 该模块扮演“宿主框架请求对象”的角色：门面（[`crate::request::Request`]）只借用它，
//! 从不拥有它。它负责：
//! 1. 将原始字节解析为请求行、标头元数据（META）与请求体。
//! 2. 提供只能读取一次的请求体数据流，并记录“是否已开始读取”。
//! 3. 缓冲请求体（`body()`），以及框架自身的表单解析（POST/FILES 缓存）。
//! 4. 保存认证结果（user/auth）以及测试工具注入的强制认证标记。

use std::collections::HashMap;
use std::io::{self, Cursor, Read};

use bytes::Bytes;
use log::{debug, error, warn};

use crate::{
    authentication::{Token, User},
    datastructures::{Files, QueryDict},
    exception::Exception,
    mediatypes::parse_header_parameters,
    multipart::parse_multipart,
    param::*,
};

/// 请求头与请求体之间的分隔符
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 宿主框架的请求对象
#[derive(Debug)]
pub struct HttpRequest {
    /// 全局请求 ID，用于追踪日志
    id: u128,
    method: HttpRequestMethod,
    /// 请求路径（不含查询字符串）
    path: String,
    query_string: String,
    version: HttpVersion,
    /// CGI 风格的元数据：`CONTENT_TYPE`、`CONTENT_LENGTH` 以及 `HTTP_<NAME>`
    meta: HashMap<String, String>,
    /// 请求体字符集，来自 `Content-Type` 的 `charset` 参数
    encoding: Option<String>,
    /// 尚未读取的请求体数据流
    stream: Cursor<Bytes>,
    /// 已缓冲的完整请求体
    body: Option<Bytes>,
    read_started: bool,
    post: Option<QueryDict>,
    files: Option<Files>,
    user: Option<User>,
    auth: Option<Token>,
    force_auth_user: Option<User>,
    force_auth_token: Option<Token>,
    ajax_override: Option<bool>,
}

impl HttpRequest {
    /// 构建一个没有标头的请求，主要供测试与程序化构造使用。
    pub fn new(method: HttpRequestMethod, path: &str) -> Self {
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (path.to_string(), String::new()),
        };
        Self {
            id: 0,
            method,
            path,
            query_string,
            version: HttpVersion::V1_1,
            meta: HashMap::new(),
            encoding: None,
            stream: Cursor::new(Bytes::new()),
            body: None,
            read_started: false,
            post: None,
            files: None,
            user: None,
            auth: None,
            force_auth_user: None,
            force_auth_token: None,
            ajax_override: None,
        }
    }

    /// 从原始字节缓冲区尝试构建 `HttpRequest` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 以空行切分头部与请求体，头部必须是合法的 UTF-8。
    /// 2. 解析请求行：提取方法、路径、查询字符串和协议版本。
    /// 3. 将标头写入 META；`Content-Type` 与 `Content-Length` 不带 `HTTP_` 前缀。
    /// 4. 请求体按声明的 `Content-Length` 截断。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, body) = match buffer
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        {
            Some(i) => (&buffer[..i], &buffer[i + HEAD_TERMINATOR.len()..]),
            None => (buffer, &[][..]),
        };

        let head = match std::str::from_utf8(head) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };
        let mut lines = head.split(CRLF);

        // 请求行 (e.g., "POST /items?x=1 HTTP/1.1")
        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method: HttpRequestMethod = parts[0].parse().map_err(|e| {
            error!("[ID{}]不支持的HTTP请求方法：{}", id, parts[0]);
            e
        })?;
        let version: HttpVersion = parts[parts.len() - 1].parse().map_err(|e| {
            error!("[ID{}]不支持的HTTP协议版本：{}", id, parts[parts.len() - 1]);
            e
        })?;
        // 路径中可能含有空格，虽然不规范但通过 join 尝试恢复
        let target = parts[1..parts.len() - 1].join(" ");

        let mut request = Self::new(method, &target);
        request.id = id;
        request.version = version;

        for line in lines {
            match line.split_once(':') {
                Some((name, value)) => request.insert_header(name, value.trim()),
                None if line.is_empty() => {}
                None => warn!("[ID{}]忽略无法解析的标头行：{}", id, line),
            }
        }

        let body = match request.content_length() {
            Some(len) if len < body.len() => &body[..len],
            _ => body,
        };
        request.stream = Cursor::new(Bytes::copy_from_slice(body));

        debug!(
            "[ID{}]解析请求完成：{} {}，请求体{}字节",
            id,
            request.method,
            request.path,
            body.len()
        );
        Ok(request)
    }

    /// 按 CGI 规则写入一个标头
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let key = name.trim().to_uppercase().replace('-', "_");
        let key = match key.as_str() {
            "CONTENT_TYPE" | "CONTENT_LENGTH" => key,
            _ => format!("HTTP_{}", key),
        };
        if key == "CONTENT_TYPE" {
            let (_, params) = parse_header_parameters(value);
            self.encoding = params.get("charset").cloned();
        }
        self.meta.insert(key, value.to_string());
    }

    /// 设置请求体，并同步 `Content-Type` 与 `Content-Length`
    pub fn set_body(&mut self, content_type: &str, body: impl Into<Bytes>) {
        let body: Bytes = body.into();
        self.insert_header("Content-Type", content_type);
        self.insert_header("Content-Length", &body.len().to_string());
        self.stream = Cursor::new(body);
        self.body = None;
        self.read_started = false;
    }

    fn content_length(&self) -> Option<usize> {
        self.meta
            .get("CONTENT_LENGTH")
            .and_then(|v| v.trim().parse().ok())
    }

    fn content_type(&self) -> &str {
        self.meta
            .get("CONTENT_TYPE")
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// 读取并缓冲完整请求体。
    ///
    /// 数据流已被直接读取过（而没有缓冲）时返回 [`Exception::RawPostData`]。
    pub fn body(&mut self) -> Result<Bytes, Exception> {
        if let Some(body) = &self.body {
            return Ok(body.clone());
        }
        if self.read_started {
            warn!("[ID{}]请求体数据流已被读取，无法再访问body", self.id);
            return Err(Exception::RawPostData);
        }
        let mut buffer = Vec::new();
        self.read_to_end(&mut buffer)?;
        let body = Bytes::from(buffer);
        self.stream = Cursor::new(body.clone());
        self.body = Some(body.clone());
        Ok(body)
    }

    /// 框架自身的表单解析结果（request.POST）
    pub fn post(&mut self) -> Result<&QueryDict, Exception> {
        if self.post.is_none() {
            self.load_post_and_files()?;
        }
        Ok(self.post.get_or_insert_with(|| QueryDict::new(DEFAULT_CHARSET)))
    }

    /// 框架自身解析出的上传文件（request.FILES）
    pub fn files(&mut self) -> Result<&Files, Exception> {
        if self.files.is_none() {
            self.load_post_and_files()?;
        }
        Ok(self.files.get_or_insert_with(Files::new))
    }

    fn load_post_and_files(&mut self) -> Result<(), Exception> {
        let encoding = self.encoding().to_string();
        if self.method != HttpRequestMethod::Post {
            self.post = Some(QueryDict::new(&encoding));
            self.files = Some(Files::new());
            return Ok(());
        }
        if self.read_started && self.body.is_none() {
            warn!("[ID{}]请求体已被读取，表单解析结果为空", self.id);
            self.post = Some(QueryDict::new(&encoding));
            self.files = Some(Files::new());
            return Ok(());
        }

        let content_type = self.content_type().to_string();
        let (base_type, _) = parse_header_parameters(&content_type);
        let (post, files) = if base_type == MULTIPART_MEDIA_TYPE {
            // 直接消费数据流，不缓冲请求体
            let mut raw = Vec::new();
            match &self.body {
                Some(body) => raw.extend_from_slice(body),
                None => {
                    self.read_to_end(&mut raw)?;
                }
            }
            match parse_multipart(&raw, &content_type, &encoding) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.post = Some(QueryDict::new(&encoding));
                    self.files = Some(Files::new());
                    return Err(e);
                }
            }
        } else if base_type == URLENCODED_MEDIA_TYPE {
            let body = self.body()?;
            (QueryDict::parse(&body, &encoding), Files::new())
        } else {
            (QueryDict::new(&encoding), Files::new())
        };
        debug!("[ID{}]框架表单解析完成：{}个字段", self.id, post.len());
        self.post = Some(post);
        self.files = Some(files);
        Ok(())
    }

    /// POST 缓存是否已经存在
    pub fn has_post(&self) -> bool {
        self.post.is_some()
    }

    pub fn set_post(&mut self, post: QueryDict) {
        self.post = Some(post);
    }

    pub fn set_files(&mut self, files: Files) {
        self.files = Some(files);
    }

    /// 查询字符串参数（request.GET）
    pub fn get_params(&self) -> QueryDict {
        QueryDict::parse(self.query_string.as_bytes(), self.encoding())
    }

    /// 测试工具使用的强制认证标记
    pub fn force_authenticate(&mut self, user: Option<User>, token: Option<Token>) {
        self.force_auth_user = user;
        self.force_auth_token = token;
    }

    pub fn forced_auth(&self) -> (Option<&User>, Option<&Token>) {
        (self.force_auth_user.as_ref(), self.force_auth_token.as_ref())
    }

    /// 按名称查找属性，供门面做属性透传
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "method" => Some(self.method.to_string()),
            "path" => Some(self.path.clone()),
            "query_string" => Some(self.query_string.clone()),
            "version" => Some(self.version.to_string()),
            "encoding" => self.encoding.clone(),
            "content_type" => Some(self.content_type().to_string()),
            "body" => self
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            _ => self.meta.get(name).cloned(),
        }
    }

    /// `X-Requested-With: XMLHttpRequest`，可被强制覆盖
    pub fn is_ajax(&self) -> bool {
        match self.ajax_override {
            Some(value) => value,
            None => self
                .meta
                .get("HTTP_X_REQUESTED_WITH")
                .map_or(false, |v| v == "XMLHttpRequest"),
        }
    }

    pub fn set_ajax_override(&mut self, value: bool) {
        self.ajax_override = Some(value);
    }
}

// --- Getter / Setter 实现 ---

impl HttpRequest {
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }

    /// 请求字符集，缺省为 utf-8
    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or(DEFAULT_CHARSET)
    }

    /// 请求声明的字符集（可能没有）
    pub fn declared_encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn set_encoding(&mut self, encoding: &str) {
        self.encoding = Some(encoding.to_string());
    }

    pub fn read_started(&self) -> bool {
        self.read_started
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    pub fn auth(&self) -> Option<&Token> {
        self.auth.as_ref()
    }

    pub fn set_auth(&mut self, auth: Option<Token>) {
        self.auth = auth;
    }
}

impl Read for HttpRequest {
    /// 从数据流读取请求体，并标记为已开始读取
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_started = true;
        self.stream.read(buf)
    }
}
