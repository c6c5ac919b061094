// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 数据容器模块
//!
//! 请求体解析结果所使用的容器类型：
//! - [`MultiValueDict`]：保持插入顺序、一个键可以对应多个值的字典。
//! - [`QueryDict`]：URL 查询字符串风格的字段容器，记录自身的字符编码。
//! - [`UploadedFile`] / [`Files`]：多部分表单中上传的文件。
//! - [`Data`]：门面对外暴露的请求数据，可能是表单、JSON，或表单字段与文件合并后的视图。

use std::collections::HashMap;

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use log::warn;
use percent_encoding::percent_decode;
use serde_json::{Map, Value};

/// 一个键可对应多个值的有序字典。
///
/// `get` 返回某个键的最后一个值，与查询字符串中“后出现者优先”的习惯一致。
/// `index` 记录每个键在 `entries` 中的位置，查找与追加都是常数时间。
#[derive(Debug, Clone, PartialEq)]
pub struct MultiValueDict<V> {
    entries: Vec<(String, Vec<V>)>,
    index: HashMap<String, usize>,
}

impl<V> Default for MultiValueDict<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> MultiValueDict<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn push_entry(&mut self, key: &str, values: Vec<V>) {
        self.index.insert(key.to_string(), self.entries.len());
        self.entries.push((key.to_string(), values));
    }

    /// 获取键的最后一个值
    pub fn get(&self, key: &str) -> Option<&V> {
        self.position(key)
            .and_then(|i| self.entries[i].1.last())
    }

    /// 获取键的全部值，不存在时返回空切片
    pub fn get_list(&self, key: &str) -> &[V] {
        match self.position(key) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    /// 用单个值替换键原有的全部值
    pub fn set(&mut self, key: &str, value: V) {
        self.set_list(key, vec![value]);
    }

    pub fn set_list(&mut self, key: &str, values: Vec<V>) {
        match self.position(key) {
            Some(i) => self.entries[i].1 = values,
            None => self.push_entry(key, values),
        }
    }

    /// 在键的值列表末尾追加一个值
    pub fn append(&mut self, key: &str, value: V) {
        match self.position(key) {
            Some(i) => self.entries[i].1.push(value),
            None => self.push_entry(key, vec![value]),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[V])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// URL 查询字符串风格的字段容器
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDict {
    values: MultiValueDict<String>,
    encoding: String,
}

impl QueryDict {
    /// 创建一个空容器
    pub fn new(encoding: &str) -> Self {
        Self {
            values: MultiValueDict::new(),
            encoding: encoding.to_string(),
        }
    }

    /// 解析 `a=1&b=2` 形式的字节串，保留空值字段。
    ///
    /// 先百分号解码为字节，再按 `encoding` 解码为字符串。
    pub fn parse(query: &[u8], encoding: &str) -> Self {
        let mut dict = Self::new(encoding);
        for pair in query.split(|&b| b == b'&').filter(|pair| !pair.is_empty()) {
            let (key, value) = match pair.iter().position(|&b| b == b'=') {
                Some(i) => (&pair[..i], &pair[i + 1..]),
                None => (pair, &[][..]),
            };
            dict.values.append(
                &decode_component(key, encoding),
                decode_component(value, encoding),
            );
        }
        dict
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_list(&self, key: &str) -> &[String] {
        self.values.get_list(key)
    }

    pub fn append(&mut self, key: &str, value: &str) {
        self.values.append(key, value.to_string());
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.set(key, value.to_string());
    }

    pub fn values(&self) -> &MultiValueDict<String> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 单值字段转为字符串，多值字段转为数组
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (key, values) in self.values.iter() {
            let value = match values {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            map.insert(key.to_string(), value);
        }
        Value::Object(map)
    }
}

/// 按字符集标签查找编码，兼容 `latin-1`、`UTF_8` 这类非标准写法
fn lookup_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).or_else(|| {
        let compact: String = label
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect();
        Encoding::for_label(compact.as_bytes())
    })
}

/// 按字符集解码字节；未知字符集按 UTF-8 处理，非法字节替换为 U+FFFD
pub fn decode_text(bytes: &[u8], encoding: &str) -> String {
    let encoding = match lookup_encoding(encoding) {
        Some(encoding) => encoding,
        None => {
            warn!("未知的字符集{}，按UTF-8解码", encoding);
            UTF_8
        }
    };
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// 表单编码的单个键或值：`+` 为空格，其余百分号解码
fn decode_component(raw: &[u8], encoding: &str) -> String {
    let replaced: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    let bytes: Vec<u8> = percent_decode(&replaced).collect();
    decode_text(&bytes, encoding)
}

/// 多部分表单中上传的单个文件
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    field_name: String,
    file_name: String,
    content_type: String,
    charset: Option<String>,
    content: Bytes,
}

impl UploadedFile {
    pub fn new(
        field_name: &str,
        file_name: &str,
        content_type: &str,
        charset: Option<String>,
        content: Bytes,
    ) -> Self {
        Self {
            field_name: field_name.to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            charset,
            content,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.file_name,
            "content_type": self.content_type,
            "size": self.size(),
        })
    }
}

/// 上传文件的集合
pub type Files = MultiValueDict<UploadedFile>;

/// 合并视图中的单个值
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Text(String),
    Json(Value),
    File(UploadedFile),
}

impl Field {
    pub fn to_json(&self) -> Value {
        match self {
            Field::Text(text) => Value::String(text.clone()),
            Field::Json(value) => value.clone(),
            Field::File(file) => file.to_json(),
        }
    }
}

/// 请求体解析后的数据
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// 表单字段（URL 编码或多部分表单中的非文件字段）
    Form(QueryDict),
    /// 任意 JSON 值，空映射即 `{}`
    Json(Value),
    /// 数据与文件合并后的视图，同名键以文件为准
    Merged(MultiValueDict<Field>),
}

impl Data {
    /// 空的通用映射
    pub fn empty_json() -> Self {
        Data::Json(Value::Object(Map::new()))
    }

    /// 以 `data` 为底，用 `files` 覆盖同名键。
    ///
    /// 非对象的 JSON 无法与文件合并，原样返回。
    pub fn merged_with(&self, files: &Files) -> Data {
        let mut merged: MultiValueDict<Field> = MultiValueDict::new();
        match self {
            Data::Form(form) => {
                for (key, values) in form.values().iter() {
                    merged.set_list(key, values.iter().cloned().map(Field::Text).collect());
                }
            }
            Data::Json(Value::Object(map)) => {
                for (key, value) in map {
                    merged.set(key, Field::Json(value.clone()));
                }
            }
            Data::Json(_) => return self.clone(),
            Data::Merged(existing) => merged = existing.clone(),
        }
        for (key, uploads) in files.iter() {
            merged.set_list(key, uploads.iter().cloned().map(Field::File).collect());
        }
        Data::Merged(merged)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Data::Form(form) => form.is_empty(),
            Data::Json(Value::Object(map)) => map.is_empty(),
            Data::Json(Value::Array(items)) => items.is_empty(),
            Data::Json(Value::Null) => true,
            Data::Json(_) => false,
            Data::Merged(merged) => merged.is_empty(),
        }
    }

    pub fn as_form(&self) -> Option<&QueryDict> {
        match self {
            Data::Form(form) => Some(form),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(value) => Some(value),
            _ => None,
        }
    }

    /// 合并视图中某个键对应的文件
    pub fn file(&self, key: &str) -> Option<&UploadedFile> {
        match self {
            Data::Merged(merged) => match merged.get(key) {
                Some(Field::File(file)) => Some(file),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Data::Form(form) => form.to_json(),
            Data::Json(value) => value.clone(),
            Data::Merged(merged) => {
                let mut map = Map::new();
                for (key, fields) in merged.iter() {
                    let value = match fields {
                        [single] => single.to_json(),
                        many => Value::Array(many.iter().map(Field::to_json).collect()),
                    };
                    map.insert(key.to_string(), value);
                }
                Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_multi_value_dict_last_value_wins() {
        let mut dict = MultiValueDict::new();
        dict.append("a", 1);
        dict.append("a", 2);
        dict.append("b", 3);
        assert_eq!(dict.get("a"), Some(&2));
        assert_eq!(dict.get_list("a"), &[1, 2]);
        assert_eq!(dict.get_list("missing"), &[] as &[i32]);
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_multi_value_dict_set_replaces() {
        let mut dict = MultiValueDict::new();
        dict.append("a", 1);
        dict.append("a", 2);
        dict.set("a", 9);
        assert_eq!(dict.get_list("a"), &[9]);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_query_dict_parse() {
        let dict = QueryDict::parse(b"a=1&b=2&a=3&empty=&flag", "utf-8");
        assert_eq!(dict.get("a"), Some("3"));
        assert_eq!(dict.get_list("a"), &["1".to_string(), "3".to_string()]);
        assert_eq!(dict.get("b"), Some("2"));
        assert_eq!(dict.get("empty"), Some(""));
        assert_eq!(dict.get("flag"), Some(""));
        assert_eq!(dict.encoding(), "utf-8");
    }

    #[test]
    fn test_query_dict_percent_decoding() {
        let dict = QueryDict::parse(b"name=%E5%BC%A0%E4%B8%89&q=a+b", "utf-8");
        assert_eq!(dict.get("name"), Some("张三"));
        assert_eq!(dict.get("q"), Some("a b"));
    }

    /// 按声明的字符集解码字段
    #[test]
    fn test_query_dict_latin1() {
        let dict = QueryDict::parse(b"name=%E9t%E9&city=K%F6ln", "latin-1");
        assert_eq!(dict.get("name"), Some("été"));
        assert_eq!(dict.get("city"), Some("Köln"));
        assert_eq!(dict.encoding(), "latin-1");
    }

    #[test]
    fn test_decode_text_labels() {
        assert_eq!(decode_text(&[0xE9], "ISO-8859-1"), "é");
        assert_eq!(decode_text("张三".as_bytes(), "UTF_8"), "张三");
        assert_eq!(decode_text(&[0xD5, 0xC5], "gbk"), "张");
        assert_eq!(decode_text(b"plain", "no-such-charset"), "plain");
        assert_eq!(decode_text(&[0xE9], "utf-8"), "\u{FFFD}");
    }

    /// 大量字段的解析保持插入顺序，且同名键合并
    #[test]
    fn test_query_dict_many_fields() {
        let body: Vec<String> = (0..20_000).map(|i| format!("k{}=", i)).collect();
        let mut body = body.join("&");
        body.push_str("&k0=last");
        let dict = QueryDict::parse(body.as_bytes(), "utf-8");
        assert_eq!(dict.len(), 20_000);
        assert_eq!(dict.get_list("k0"), &["".to_string(), "last".to_string()]);
        assert_eq!(dict.values().keys().nth(19_999), Some("k19999"));
    }

    #[test]
    fn test_query_dict_to_json() {
        let dict = QueryDict::parse(b"a=1&b=2&b=3", "utf-8");
        assert_eq!(dict.to_json(), json!({"a": "1", "b": ["2", "3"]}));
    }

    /// 同名键以文件为准
    #[test]
    fn test_merge_files_override_fields() {
        let data = Data::Form(QueryDict::parse(b"title=hello&avatar=old", "utf-8"));
        let mut files = Files::new();
        files.append(
            "avatar",
            UploadedFile::new("avatar", "me.png", "image/png", None, Bytes::from_static(b"PNG")),
        );

        let merged = data.merged_with(&files);
        let avatar = merged.file("avatar").unwrap();
        assert_eq!(avatar.file_name(), "me.png");
        assert_eq!(avatar.size(), 3);
        assert_eq!(merged.to_json()["title"], json!("hello"));
    }

    #[test]
    fn test_merge_json_object() {
        let data = Data::Json(json!({"a": 1}));
        let mut files = Files::new();
        files.append(
            "f",
            UploadedFile::new("f", "a.txt", "text/plain", None, Bytes::from_static(b"x")),
        );
        let merged = data.merged_with(&files);
        assert_eq!(merged.to_json()["a"], json!(1));
        assert!(merged.file("f").is_some());
    }

    #[test]
    fn test_merge_non_object_json_is_unchanged() {
        let data = Data::Json(json!([1, 2]));
        let mut files = Files::new();
        files.append(
            "f",
            UploadedFile::new("f", "a.txt", "text/plain", None, Bytes::from_static(b"x")),
        );
        assert_eq!(data.merged_with(&files), data);
    }

    #[test]
    fn test_empty_data() {
        assert!(Data::empty_json().is_empty());
        assert!(Data::Form(QueryDict::new("utf-8")).is_empty());
        assert!(!Data::Json(json!(0)).is_empty());
        assert_eq!(Data::empty_json().to_json(), json!({}));
    }
}
