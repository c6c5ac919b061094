// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 媒体类型模块
//!
//! 解析 `Content-Type` 形式的字符串（主类型、子类型与参数），
//! 并提供内容协商时使用的通配符、参数感知的匹配规则。

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::param::FORM_MEDIA_TYPES;

lazy_static! {
    /// 匹配 `; name=value` 形式的参数，值可以是带转义的引号字符串。
    static ref PARAM_RE: Regex =
        Regex::new(r#";\s*([^=;\s]+)\s*=\s*("(?:[^"\\]|\\.)*"|[^;]*)"#).unwrap();
}

/// 将形如 `text/html; charset="utf-8"` 的头部值拆分为小写的主值与参数表。
///
/// 参数名统一转为小写，引号包裹的参数值会去掉引号并还原转义字符。
pub fn parse_header_parameters(line: &str) -> (String, HashMap<String, String>) {
    let (base, rest) = match line.find(';') {
        Some(i) => (&line[..i], &line[i..]),
        None => (line, ""),
    };
    let mut params = HashMap::new();
    for capture in PARAM_RE.captures_iter(rest) {
        let name = capture[1].trim().to_lowercase();
        let mut value = capture[2].trim().to_string();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = value[1..value.len() - 1]
                .replace("\\\\", "\\")
                .replace("\\\"", "\"");
        }
        params.insert(name, value);
    }
    (base.trim().to_lowercase(), params)
}

/// 解析后的媒体类型
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    /// 原始字符串
    orig: String,
    main_type: String,
    sub_type: String,
    params: HashMap<String, String>,
}

impl MediaType {
    pub fn parse(media_type: &str) -> Self {
        let (full_type, params) = parse_header_parameters(media_type);
        let (main_type, sub_type) = match full_type.split_once('/') {
            Some((main, sub)) => (main.to_string(), sub.to_string()),
            None => (full_type, String::new()),
        };
        Self {
            orig: media_type.trim().to_string(),
            main_type,
            sub_type,
            params,
        }
    }

    pub fn main_type(&self) -> &str {
        &self.main_type
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// 不含参数的 `主类型/子类型`
    pub fn full_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// 判断 `self`（通常是解析器声明的类型）能否接受 `other`（请求声明的类型）。
    ///
    /// `self` 上除 `q` 以外的每个参数都必须在 `other` 上取相同的值；
    /// 任意一侧的主类型或子类型为 `*` 时视为匹配。
    pub fn matches(&self, other: &MediaType) -> bool {
        for (key, value) in &self.params {
            if key != "q" && other.params.get(key) != Some(value) {
                return false;
            }
        }

        if self.sub_type != "*" && other.sub_type != "*" && other.sub_type != self.sub_type {
            return false;
        }

        if self.main_type != "*" && other.main_type != "*" && other.main_type != self.main_type {
            return false;
        }

        true
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.orig)
    }
}

/// 判断解析器类型 `lhs` 是否接受请求类型 `rhs`
pub fn media_type_matches(lhs: &str, rhs: &str) -> bool {
    MediaType::parse(lhs).matches(&MediaType::parse(rhs))
}

/// 是否为表单类媒体类型（URL 编码或多部分表单）
pub fn is_form_media_type(media_type: &str) -> bool {
    let (base_media_type, _) = parse_header_parameters(media_type);
    FORM_MEDIA_TYPES.contains(&base_media_type.as_str())
}
