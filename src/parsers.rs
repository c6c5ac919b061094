// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 解析器模块
//!
//! 每个解析器声明自己能解码的媒体类型，并把请求体数据流解码为 [`Parsed`]：
//! 要么只有数据，要么是数据加文件。

use std::fmt;
use std::io::Read;
use std::rc::Rc;

use log::{debug, warn};

use crate::{
    datastructures::{Data, Files, QueryDict},
    exception::Exception,
    multipart::parse_multipart,
    param::{DEFAULT_CHARSET, JSON_MEDIA_TYPE, MULTIPART_MEDIA_TYPE, URLENCODED_MEDIA_TYPE},
};

/// 解析时携带的上下文
#[derive(Debug, Clone, PartialEq)]
pub struct ParserContext {
    encoding: String,
    request_id: u128,
}

impl ParserContext {
    /// 编码依次取请求编码、配置的默认字符集、utf-8，保证非空
    pub fn new(encoding: Option<&str>, default_charset: &str, request_id: u128) -> Self {
        let encoding = [encoding.unwrap_or_default(), default_charset]
            .into_iter()
            .map(str::trim)
            .find(|e| !e.is_empty())
            .unwrap_or(DEFAULT_CHARSET);
        Self {
            encoding: encoding.to_string(),
            request_id,
        }
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn request_id(&self) -> u128 {
        self.request_id
    }
}

/// 解析器的输出
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// 只有数据，文件视为空
    Data(Data),
    DataAndFiles(Data, Files),
}

impl Parsed {
    pub fn into_parts(self) -> (Data, Files) {
        match self {
            Parsed::Data(data) => (data, Files::new()),
            Parsed::DataAndFiles(data, files) => (data, files),
        }
    }
}

/// 解析器能力
pub trait Parser {
    /// 能够解码的媒体类型，可以带通配符或参数
    fn media_type(&self) -> &str;

    fn parse(
        &self,
        stream: &mut dyn Read,
        media_type: &str,
        context: &ParserContext,
    ) -> Result<Parsed, Exception>;
}

impl fmt::Debug for dyn Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parser({})", self.media_type())
    }
}

fn read_all(stream: &mut dyn Read) -> Result<Vec<u8>, Exception> {
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// JSON 解析器
#[derive(Debug, Clone, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn media_type(&self) -> &str {
        JSON_MEDIA_TYPE
    }

    fn parse(
        &self,
        stream: &mut dyn Read,
        _media_type: &str,
        context: &ParserContext,
    ) -> Result<Parsed, Exception> {
        let raw = read_all(stream)?;
        if !context.encoding().eq_ignore_ascii_case("utf-8")
            && !context.encoding().eq_ignore_ascii_case("utf8")
        {
            warn!(
                "[ID{}]JSON请求体声明了编码{}，按UTF-8解码",
                context.request_id(),
                context.encoding()
            );
        }
        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Parsed::Data(Data::Json(value))),
            Err(e) => {
                debug!("[ID{}]JSON解析失败：{}", context.request_id(), e);
                Err(Exception::ParseError(format!("JSON parse error - {}", e)))
            }
        }
    }
}

/// URL 编码表单解析器
#[derive(Debug, Clone, Default)]
pub struct FormParser;

impl Parser for FormParser {
    fn media_type(&self) -> &str {
        URLENCODED_MEDIA_TYPE
    }

    fn parse(
        &self,
        stream: &mut dyn Read,
        _media_type: &str,
        context: &ParserContext,
    ) -> Result<Parsed, Exception> {
        let raw = read_all(stream)?;
        Ok(Parsed::Data(Data::Form(QueryDict::parse(
            &raw,
            context.encoding(),
        ))))
    }
}

/// 多部分表单解析器，边界取自 `media_type` 的参数
#[derive(Debug, Clone, Default)]
pub struct MultiPartParser;

impl Parser for MultiPartParser {
    fn media_type(&self) -> &str {
        MULTIPART_MEDIA_TYPE
    }

    fn parse(
        &self,
        stream: &mut dyn Read,
        media_type: &str,
        context: &ParserContext,
    ) -> Result<Parsed, Exception> {
        let raw = read_all(stream)?;
        let (data, files) = parse_multipart(&raw, media_type, context.encoding())?;
        Ok(Parsed::DataAndFiles(Data::Form(data), files))
    }
}

/// JSON、URL 编码表单、多部分表单三种解析器
pub fn default_parsers() -> Vec<Rc<dyn Parser>> {
    vec![
        Rc::new(JsonParser),
        Rc::new(FormParser),
        Rc::new(MultiPartParser),
    ]
}
