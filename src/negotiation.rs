// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内容协商
//!
//! 根据请求声明的 `Content-Type` 从配置的解析器列表中选出一个解析器。

use std::rc::Rc;

use log::debug;

use crate::{mediatypes::media_type_matches, parsers::Parser, request::Request};

/// 协商器能力
pub trait ContentNegotiation {
    /// 返回第一个能处理请求内容类型的解析器，没有则返回 `None`
    fn select_parser(
        &self,
        request: &Request<'_>,
        parsers: &[Rc<dyn Parser>],
    ) -> Option<Rc<dyn Parser>>;
}

/// 按配置顺序逐个匹配，支持通配符与参数
#[derive(Debug, Clone, Default)]
pub struct DefaultContentNegotiation;

impl ContentNegotiation for DefaultContentNegotiation {
    fn select_parser(
        &self,
        request: &Request<'_>,
        parsers: &[Rc<dyn Parser>],
    ) -> Option<Rc<dyn Parser>> {
        let content_type = request.content_type();
        let selected = parsers
            .iter()
            .find(|parser| media_type_matches(parser.media_type(), &content_type))
            .cloned();
        debug!(
            "[ID{}]内容协商：{} -> {:?}",
            request.id(),
            content_type,
            selected.as_ref().map(|p| p.media_type().to_string())
        );
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::datastructures::Data;
    use crate::exception::Exception;
    use crate::http_request::HttpRequest;
    use crate::param::HttpRequestMethod;
    use crate::parsers::{default_parsers, Parsed, ParserContext};
    use std::cell::RefCell;
    use std::io::Read;

    /// 接受任意类型的解析器
    struct AnyParser;

    impl Parser for AnyParser {
        fn media_type(&self) -> &str {
            "*/*"
        }

        fn parse(
            &self,
            _stream: &mut dyn Read,
            _media_type: &str,
            _context: &ParserContext,
        ) -> Result<Parsed, Exception> {
            Ok(Parsed::Data(Data::empty_json()))
        }
    }

    fn select(content_type: &str, parsers: &[Rc<dyn Parser>]) -> Option<String> {
        let mut raw = HttpRequest::new(HttpRequestMethod::Post, "/");
        raw.insert_header("Content-Type", content_type);
        let raw = RefCell::new(raw);
        let request = Request::new(&raw, vec![], vec![], &Settings::default());
        DefaultContentNegotiation
            .select_parser(&request, parsers)
            .map(|p| p.media_type().to_string())
    }

    #[test]
    fn test_select_by_content_type() {
        let parsers = default_parsers();
        assert_eq!(
            select("application/json; charset=utf-8", &parsers).as_deref(),
            Some("application/json")
        );
        assert_eq!(
            select("multipart/form-data; boundary=x", &parsers).as_deref(),
            Some("multipart/form-data")
        );
        assert_eq!(select("text/csv", &parsers), None);
    }

    /// 第一个匹配者胜出
    #[test]
    fn test_first_match_wins() {
        let parsers: Vec<Rc<dyn Parser>> = vec![Rc::new(AnyParser), default_parsers().remove(0)];
        assert_eq!(select("application/json", &parsers).as_deref(), Some("*/*"));
    }
}
