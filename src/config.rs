// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::rc::Rc;

use log::{error, warn};
use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::{
    authentication::{Token, User},
    exception::Exception,
    negotiation::{ContentNegotiation, DefaultContentNegotiation},
    param::DEFAULT_CHARSET,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    port: u16,
    worker_threads: usize,
    local: bool,
    #[serde(default = "default_charset")]
    default_charset: String,
    /// 未认证请求的身份是否为匿名用户（否则为空）
    #[serde(default = "default_anonymous_user")]
    anonymous_user: bool,
    /// 未认证请求的默认凭据
    #[serde(default)]
    unauthenticated_token: Option<String>,
    #[serde(default = "default_max_body_size")]
    max_body_size: usize,
    /// 令牌 -> 用户名
    #[serde(default)]
    tokens: HashMap<String, String>,
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn default_anonymous_user() -> bool {
    true
}

fn default_max_body_size() -> usize {
    2621440 // 2.5MB
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 7878,
            worker_threads: 0,
            local: true,
            default_charset: default_charset(),
            anonymous_user: default_anonymous_user(),
            unauthenticated_token: None,
            max_body_size: default_max_body_size(),
            tokens: HashMap::new(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename)
            .map_err(|e| Exception::Config(format!("no such file {}: {}", filename, e)))?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)
            .map_err(|e| Exception::Config(format!("error reading file {}: {}", filename, e)))?;

        let mut raw_config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.default_charset.trim().is_empty() {
            warn!("default_charset被设置为空，该值将被改为{}。", DEFAULT_CHARSET);
            raw_config.default_charset = default_charset();
        }
        Ok(raw_config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    pub fn anonymous_user(&self) -> bool {
        self.anonymous_user
    }

    pub fn unauthenticated_token(&self) -> Option<&str> {
        self.unauthenticated_token.as_deref()
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn tokens(&self) -> &HashMap<String, String> {
        &self.tokens
    }
}

pub type UserFactory = Rc<dyn Fn() -> User>;
pub type TokenFactory = Rc<dyn Fn() -> Token>;
pub type NegotiatorFactory = Rc<dyn Fn() -> Rc<dyn ContentNegotiation>>;

/// 门面在构造时注入的运行期设置
#[derive(Clone)]
pub struct Settings {
    default_charset: String,
    unauthenticated_user: Option<UserFactory>,
    unauthenticated_token: Option<TokenFactory>,
    negotiator: NegotiatorFactory,
}

impl Default for Settings {
    /// utf-8、匿名用户、无默认凭据、默认协商器
    fn default() -> Self {
        Self {
            default_charset: DEFAULT_CHARSET.to_string(),
            unauthenticated_user: Some(Rc::new(User::anonymous)),
            unauthenticated_token: None,
            negotiator: Rc::new(|| Rc::new(DefaultContentNegotiation) as Rc<dyn ContentNegotiation>),
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Self::default().with_default_charset(config.default_charset());
        if !config.anonymous_user() {
            settings.unauthenticated_user = None;
        }
        if let Some(key) = config.unauthenticated_token() {
            let key = key.to_string();
            settings.unauthenticated_token = Some(Rc::new(move || Token::new(&key)));
        }
        settings
    }

    pub fn with_default_charset(mut self, charset: &str) -> Self {
        self.default_charset = charset.to_string();
        self
    }

    pub fn with_unauthenticated_user(mut self, factory: Option<UserFactory>) -> Self {
        self.unauthenticated_user = factory;
        self
    }

    pub fn with_unauthenticated_token(mut self, factory: Option<TokenFactory>) -> Self {
        self.unauthenticated_token = factory;
        self
    }

    pub fn with_negotiator(mut self, factory: NegotiatorFactory) -> Self {
        self.negotiator = factory;
        self
    }

    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    /// 未认证请求的身份
    pub fn unauthenticated_user(&self) -> Option<User> {
        self.unauthenticated_user.as_ref().map(|factory| factory())
    }

    /// 未认证请求的凭据
    pub fn unauthenticated_token(&self) -> Option<Token> {
        self.unauthenticated_token.as_ref().map(|factory| factory())
    }

    pub fn negotiator(&self) -> Rc<dyn ContentNegotiation> {
        (self.negotiator)()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("default_charset", &self.default_charset)
            .field("unauthenticated_user", &self.unauthenticated_user.is_some())
            .field("unauthenticated_token", &self.unauthenticated_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_toml() {
        let file = write_config(
            r#"
            port = 9000
            worker_threads = 2
            local = false
            default_charset = "gbk"
            anonymous_user = false
            unauthenticated_token = "guest"

            [tokens]
            abc = "alice"
            "#,
        );
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.worker_threads(), 2);
        assert!(!config.local());
        assert_eq!(config.default_charset(), "gbk");
        assert!(!config.anonymous_user());
        assert_eq!(config.unauthenticated_token(), Some("guest"));
        assert_eq!(config.tokens().get("abc").unwrap(), "alice");
        assert_eq!(config.max_body_size(), default_max_body_size());
    }

    /// worker_threads 为 0 时按 CPU 数量设置
    #[test]
    fn test_auto_worker_threads() {
        let file = write_config("port = 7878\nworker_threads = 0\nlocal = true\n");
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.worker_threads(), num_cpus::get());
        assert!(config.anonymous_user());
        assert_eq!(config.default_charset(), "utf-8");
    }

    #[test]
    fn test_malformed_toml_falls_back_to_defaults() {
        let file = write_config("port = \"not a number\"");
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port(), 7878);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_toml("/nonexistent/development.toml");
        assert!(matches!(result, Err(Exception::Config(_))));
    }

    #[test]
    fn test_empty_charset_is_replaced() {
        let file = write_config("port = 1\nworker_threads = 1\nlocal = true\ndefault_charset = \"\"\n");
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.default_charset(), "utf-8");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::new();
        config.anonymous_user = false;
        config.unauthenticated_token = Some("guest".to_string());
        let settings = Settings::from_config(&config);
        assert_eq!(settings.unauthenticated_user(), None);
        assert_eq!(settings.unauthenticated_token(), Some(Token::new("guest")));
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.default_charset(), "utf-8");
        assert_eq!(settings.unauthenticated_user(), Some(User::anonymous()));
        assert_eq!(settings.unauthenticated_token(), None);
    }
}
