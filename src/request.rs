// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求门面模块
//!
//! [`Request`] 包装底层的 [`HttpRequest`]，在其上提供：
//! 1. 按 `Content-Type` 协商解析器，惰性解析请求体并缓存结果（`data` / `files`）。
//! 2. 依次尝试认证器，惰性得到身份与凭据并缓存（`user` / `auth`）。
//! 3. 对底层请求的属性透传。
//! 4. 通过 [`clone_request`] 以另一种 HTTP 方法复制请求，用于探测权限而不重新解析。
//!
//! 每个缓存字段都从 [`Cached::Unset`] 开始，在同一个事务内至多被解析一次；
//! `Resolved(None)` 是合法的缓存值，与 `Unset` 不同。

use std::cell::RefCell;
use std::io::{self, Cursor, Read};
use std::rc::Rc;

use bytes::Bytes;
use log::{debug, warn};

use crate::{
    authentication::{Authenticator, ForcedAuthentication, Token, User},
    config::Settings,
    datastructures::{Data, Files, QueryDict},
    exception::Exception,
    http_request::HttpRequest,
    mediatypes::is_form_media_type,
    negotiation::ContentNegotiation,
    param::{HttpRequestMethod, FORM_MEDIA_TYPES},
    parsers::{Parsed, Parser, ParserContext},
};

/// 门面自身的类型名，用于属性不存在时的错误信息
const TYPE_NAME: &str = "Request";

/// 惰性缓存字段的状态
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cached<T> {
    #[default]
    Unset,
    Resolved(T),
}

impl<T> Cached<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Cached::Resolved(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Cached::Resolved(value) => Some(value),
            Cached::Unset => None,
        }
    }

    /// 已解析的值；尚未解析时按“属性不存在”报错
    fn resolved(&self, attr: &str) -> Result<&T, Exception> {
        self.get().ok_or_else(|| Exception::NoSuchAttribute {
            type_name: TYPE_NAME,
            attr: attr.to_string(),
        })
    }
}

/// 请求体数据流
#[derive(Debug, Clone)]
pub enum BodyStream<'a> {
    /// 底层请求本身，尚未被读取过
    Request(&'a RefCell<HttpRequest>),
    /// 底层请求已被读取，重新包装其缓冲的请求体
    Buffered(Cursor<Bytes>),
}

impl Read for BodyStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyStream::Request(request) => request.borrow_mut().read(buf),
            BodyStream::Buffered(cursor) => cursor.read(buf),
        }
    }
}

/// 请求门面
pub struct Request<'a> {
    request: &'a RefCell<HttpRequest>,
    parsers: Vec<Rc<dyn Parser>>,
    authenticators: Vec<Rc<dyn Authenticator>>,
    negotiator: Rc<dyn ContentNegotiation>,
    settings: Settings,
    parser_context: ParserContext,
    /// 覆盖底层请求的方法（克隆时设置）
    method: Option<HttpRequestMethod>,

    stream: Cached<Option<BodyStream<'a>>>,
    data: Cached<Data>,
    files: Cached<Files>,
    full_data: Cached<Data>,
    user: Cached<Option<User>>,
    auth: Cached<Option<Token>>,
    authenticator: Cached<Option<Rc<dyn Authenticator>>>,

    // 视图层写入的内容协商与版本信息，克隆时原样复制
    accepted_renderer: Option<String>,
    accepted_media_type: Option<String>,
    version: Option<String>,
    versioning_scheme: Option<String>,
}

impl<'a> Request<'a> {
    /// 包装底层请求。
    ///
    /// 底层请求带有强制认证标记时，认证器列表被替换为唯一的 [`ForcedAuthentication`]。
    pub fn new(
        request: &'a RefCell<HttpRequest>,
        parsers: Vec<Rc<dyn Parser>>,
        authenticators: Vec<Rc<dyn Authenticator>>,
        settings: &Settings,
    ) -> Self {
        let raw = request.borrow();
        let parser_context = ParserContext::new(
            raw.declared_encoding(),
            settings.default_charset(),
            raw.id(),
        );

        let authenticators = match raw.forced_auth() {
            (None, None) => authenticators,
            (user, token) => {
                debug!("[ID{}]检测到强制认证标记，忽略已配置的认证器", raw.id());
                let forced: Rc<dyn Authenticator> =
                    Rc::new(ForcedAuthentication::new(user.cloned(), token.cloned()));
                vec![forced]
            }
        };
        drop(raw);

        Self {
            request,
            parsers,
            authenticators,
            negotiator: settings.negotiator(),
            settings: settings.clone(),
            parser_context,
            method: None,
            stream: Cached::Unset,
            data: Cached::Unset,
            files: Cached::Unset,
            full_data: Cached::Unset,
            user: Cached::Unset,
            auth: Cached::Unset,
            authenticator: Cached::Unset,
            accepted_renderer: None,
            accepted_media_type: None,
            version: None,
            versioning_scheme: None,
        }
    }

    /// 请求声明的内容类型，没有时为空字符串
    pub fn content_type(&self) -> String {
        self.request
            .borrow()
            .meta()
            .get("CONTENT_TYPE")
            .cloned()
            .unwrap_or_default()
    }

    /// 请求体数据流：无内容时为 `None`
    pub fn stream(&mut self) -> Result<Option<&mut BodyStream<'a>>, Exception> {
        if !self.stream.is_resolved() {
            self.load_stream()?;
        }
        match &mut self.stream {
            Cached::Resolved(stream) => Ok(stream.as_mut()),
            Cached::Unset => Ok(None),
        }
    }

    fn load_stream(&mut self) -> Result<(), Exception> {
        let mut raw = self.request.borrow_mut();
        // 缺失或非数字都视为 0
        let content_length = raw
            .meta()
            .get("CONTENT_LENGTH")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let stream = if content_length == 0 {
            None
        } else if !raw.read_started() {
            Some(BodyStream::Request(self.request))
        } else {
            Some(BodyStream::Buffered(Cursor::new(raw.body()?)))
        };
        debug!(
            "[ID{}]请求体数据流：长度{}，{}",
            raw.id(),
            content_length,
            match &stream {
                None => "无内容",
                Some(BodyStream::Request(_)) => "直接读取底层请求",
                Some(BodyStream::Buffered(_)) => "重新包装已缓冲的请求体",
            }
        );
        drop(raw);

        self.stream = Cached::Resolved(stream);
        Ok(())
    }

    /// 解析后的数据与文件合并视图；同一事务内多次访问返回同一个缓存对象
    pub fn data(&mut self) -> Result<&Data, Exception> {
        if !self.full_data.is_resolved() {
            self.load_data_and_files()?;
        }
        self.full_data.resolved("data")
    }

    /// 上传的文件
    pub fn files(&mut self) -> Result<&Files, Exception> {
        if !self.files.is_resolved() {
            self.load_data_and_files()?;
        }
        self.files.resolved("files")
    }

    /// 表单字段；非表单类请求返回空容器
    pub fn post(&mut self) -> Result<QueryDict, Exception> {
        if !self.data.is_resolved() {
            self.load_data_and_files()?;
        }
        Ok(self.form_data())
    }

    fn form_data(&self) -> QueryDict {
        if is_form_media_type(&self.content_type()) {
            if let Some(Data::Form(form)) = self.data.get() {
                return form.clone();
            }
        }
        QueryDict::new(self.request.borrow().encoding())
    }

    fn load_data_and_files(&mut self) -> Result<(), Exception> {
        if self.data.is_resolved() {
            return Ok(());
        }

        let (data, files) = self.parse()?;
        self.full_data = Cached::Resolved(if files.is_empty() {
            data.clone()
        } else {
            data.merged_with(&files)
        });
        self.data = Cached::Resolved(data);
        self.files = Cached::Resolved(files);

        // 表单类请求把结果写回底层请求，与其它共享者保持一致
        if is_form_media_type(&self.content_type()) {
            let post = self.form_data();
            let files = self.files.get().cloned().unwrap_or_default();
            let mut raw = self.request.borrow_mut();
            raw.set_post(post);
            raw.set_files(files);
        }
        Ok(())
    }

    fn empty_data(&self, media_type: &str) -> (Data, Files) {
        let data = if !media_type.is_empty() && is_form_media_type(media_type) {
            Data::Form(QueryDict::new(self.request.borrow().encoding()))
        } else {
            Data::empty_json()
        };
        (data, Files::new())
    }

    /// 至少有一个解析器声明支持表单类媒体类型
    fn supports_form_parsing(&self) -> bool {
        self.parsers
            .iter()
            .any(|parser| FORM_MEDIA_TYPES.contains(&parser.media_type()))
    }

    fn parse(&mut self) -> Result<(Data, Files), Exception> {
        let media_type = self.content_type();
        let id = self.id();

        let has_stream = match self.stream().map(|stream| stream.is_some()) {
            Ok(has_stream) => has_stream,
            Err(Exception::RawPostData) => {
                // 框架自身的表单解析已经消费了数据流
                let has_post = self.request.borrow().has_post();
                if has_post && self.supports_form_parsing() {
                    debug!("[ID{}]数据流已被框架表单解析消费，复用其POST/FILES", id);
                    let mut raw = self.request.borrow_mut();
                    let post = raw.post()?.clone();
                    let files = raw.files()?.clone();
                    return Ok((Data::Form(post), files));
                }
                warn!("[ID{}]请求体数据流已被消费，无法解析", id);
                return Err(Exception::RawPostData);
            }
            Err(e) => return Err(e),
        };

        if !has_stream || media_type.is_empty() {
            return Ok(self.empty_data(&media_type));
        }

        let parser = match self.negotiator.select_parser(self, &self.parsers) {
            Some(parser) => parser,
            None => {
                warn!("[ID{}]没有解析器支持媒体类型：{}", id, media_type);
                return Err(Exception::UnsupportedMediaType(media_type));
            }
        };

        let context = self.parser_context.clone();
        let parsed = match &mut self.stream {
            Cached::Resolved(Some(stream)) => parser.parse(stream, &media_type, &context),
            _ => Ok(Parsed::Data(Data::empty_json())),
        };

        match parsed {
            Ok(parsed) => Ok(parsed.into_parts()),
            Err(e) => {
                // 填入空结果再抛出，之后的访问（例如渲染错误页）不会重复解析
                warn!("[ID{}]解析请求体失败：{}", id, e);
                let empty = Data::Form(QueryDict::new(self.request.borrow().encoding()));
                self.data = Cached::Resolved(empty.clone());
                self.files = Cached::Resolved(Files::new());
                self.full_data = Cached::Resolved(empty);
                Err(e)
            }
        }
    }

    /// 认证得到的身份
    pub fn user(&mut self) -> Result<Option<&User>, Exception> {
        if !self.user.is_resolved() {
            self.authenticate()?;
        }
        Ok(self.user.resolved("user")?.as_ref())
    }

    /// 设置身份，同时写回底层请求
    pub fn set_user(&mut self, user: Option<User>) {
        self.request.borrow_mut().set_user(user.clone());
        self.user = Cached::Resolved(user);
    }

    /// 认证附带的凭据
    pub fn auth(&mut self) -> Result<Option<&Token>, Exception> {
        if !self.auth.is_resolved() {
            self.authenticate()?;
        }
        Ok(self.auth.resolved("auth")?.as_ref())
    }

    /// 设置凭据，同时写回底层请求
    pub fn set_auth(&mut self, auth: Option<Token>) {
        self.request.borrow_mut().set_auth(auth.clone());
        self.auth = Cached::Resolved(auth);
    }

    /// 认证成功的认证器；未认证时为 `None`
    pub fn successful_authenticator(&mut self) -> Result<Option<Rc<dyn Authenticator>>, Exception> {
        if !self.authenticator.is_resolved() {
            self.authenticate()?;
        }
        Ok(self.authenticator.resolved("successful_authenticator")?.clone())
    }

    fn authenticate(&mut self) -> Result<(), Exception> {
        let authenticators = self.authenticators.clone();
        for authenticator in authenticators {
            let user_auth = match authenticator.authenticate(self) {
                Ok(user_auth) => user_auth,
                Err(e) if e.is_api_exception() => {
                    warn!("[ID{}]{}认证失败：{}", self.id(), authenticator.name(), e);
                    self.not_authenticated();
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            if let Some((user, auth)) = user_auth {
                debug!(
                    "[ID{}]{}认证成功：{}",
                    self.id(),
                    authenticator.name(),
                    user.username()
                );
                self.authenticator = Cached::Resolved(Some(authenticator));
                self.set_user(Some(user));
                self.set_auth(auth);
                return Ok(());
            }
        }

        self.not_authenticated();
        Ok(())
    }

    /// 标记为未认证：认证器为空，身份与凭据取配置的默认值
    fn not_authenticated(&mut self) {
        self.authenticator = Cached::Resolved(None);
        let user = self.settings.unauthenticated_user();
        let auth = self.settings.unauthenticated_token();
        self.set_user(user);
        self.set_auth(auth);
    }

    /// 认证失败时 `WWW-Authenticate` 标头的值，取第一个认证器
    pub fn authenticate_header(&self) -> Option<String> {
        self.authenticators
            .first()
            .and_then(|authenticator| authenticator.authenticate_header(self))
    }

    /// 强制错误页使用纯文本（或 HTML）格式
    pub fn force_plaintext_errors(&self, value: bool) {
        self.request.borrow_mut().set_ajax_override(value);
    }
}

// --- 透传到底层请求的访问器 ---

impl<'a> Request<'a> {
    pub fn id(&self) -> u128 {
        self.request.borrow().id()
    }

    /// 当前方法，克隆时可能被覆盖
    pub fn method(&self) -> HttpRequestMethod {
        self.method.unwrap_or_else(|| self.request.borrow().method())
    }

    pub fn path(&self) -> String {
        self.request.borrow().path().to_string()
    }

    /// 查询字符串参数
    pub fn query_params(&self) -> QueryDict {
        self.request.borrow().get_params()
    }

    /// CGI 风格的元数据
    pub fn meta(&self, key: &str) -> Option<String> {
        self.request.borrow().meta().get(key).cloned()
    }

    /// 按 HTTP 标头名读取，大小写不敏感
    pub fn header(&self, name: &str) -> Option<String> {
        let key = name.to_uppercase().replace('-', "_");
        let raw = self.request.borrow();
        let meta = raw.meta();
        meta.get(&format!("HTTP_{}", key))
            .or_else(|| meta.get(&key))
            .cloned()
    }

    pub fn user_agent(&self) -> Option<String> {
        self.header("User-Agent")
    }

    pub fn encoding(&self) -> &str {
        self.parser_context.encoding()
    }

    pub fn parser_context(&self) -> &ParserContext {
        &self.parser_context
    }

    pub fn is_ajax(&self) -> bool {
        self.request.borrow().is_ajax()
    }

    /// 被包装的底层请求
    pub fn raw(&self) -> &'a RefCell<HttpRequest> {
        self.request
    }

    pub fn parsers(&self) -> &[Rc<dyn Parser>] {
        &self.parsers
    }

    pub fn authenticators(&self) -> &[Rc<dyn Authenticator>] {
        &self.authenticators
    }

    /// 通用属性透传：先查门面自身，再查底层请求
    pub fn attr(&self, name: &str) -> Result<String, Exception> {
        let own = match name {
            "method" => Some(self.method().to_string()),
            "encoding" => Some(self.encoding().to_string()),
            "content_type" => Some(self.content_type()),
            "accepted_renderer" => self.accepted_renderer.clone(),
            "accepted_media_type" => self.accepted_media_type.clone(),
            "version" => self.version.clone(),
            "versioning_scheme" => self.versioning_scheme.clone(),
            _ => None,
        };
        own.or_else(|| self.request.borrow().attribute(name))
            .ok_or_else(|| Exception::NoSuchAttribute {
                type_name: TYPE_NAME,
                attr: name.to_string(),
            })
    }
}

// --- 视图层写入的协商结果 ---

impl<'a> Request<'a> {
    pub fn accepted_renderer(&self) -> Option<&str> {
        self.accepted_renderer.as_deref()
    }

    pub fn set_accepted_renderer(&mut self, renderer: &str) {
        self.accepted_renderer = Some(renderer.to_string());
    }

    pub fn accepted_media_type(&self) -> Option<&str> {
        self.accepted_media_type.as_deref()
    }

    pub fn set_accepted_media_type(&mut self, media_type: &str) {
        self.accepted_media_type = Some(media_type.to_string());
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn set_version(&mut self, version: &str, scheme: &str) {
        self.version = Some(version.to_string());
        self.versioning_scheme = Some(scheme.to_string());
    }

    pub fn versioning_scheme(&self) -> Option<&str> {
        self.versioning_scheme.as_deref()
    }
}

/// 以另一种 HTTP 方法复制请求。
///
/// 新门面包装同一个底层请求，共享解析器、认证器与协商器配置，
/// 所有已解析的缓存原样复制，不会重新解析或重新认证。
pub fn clone_request<'a>(request: &Request<'a>, method: HttpRequestMethod) -> Request<'a> {
    debug!(
        "[ID{}]以{}方法克隆请求（原方法{}）",
        request.id(),
        method,
        request.method()
    );
    Request {
        request: request.request,
        parsers: request.parsers.clone(),
        authenticators: request.authenticators.clone(),
        negotiator: Rc::clone(&request.negotiator),
        settings: request.settings.clone(),
        parser_context: request.parser_context.clone(),
        method: Some(method),
        stream: request.stream.clone(),
        data: request.data.clone(),
        files: request.files.clone(),
        full_data: request.full_data.clone(),
        user: request.user.clone(),
        auth: request.auth.clone(),
        authenticator: request.authenticator.clone(),
        accepted_renderer: request.accepted_renderer.clone(),
        accepted_media_type: request.accepted_media_type.clone(),
        version: request.version.clone(),
        versioning_scheme: request.versioning_scheme.clone(),
    }
}
