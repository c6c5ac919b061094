// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod authentication;
pub mod config;
pub mod datastructures;
pub mod exception;
pub mod http_request;
pub mod mediatypes;
pub mod multipart;
pub mod negotiation;
pub mod param;
pub mod parsers;
pub mod request;
pub mod response;

pub use authentication::{
    Authenticator, ForcedAuthentication, InMemoryUserStore, Token, TokenAuthentication, User,
    UserStore,
};
pub use config::{Config, Settings};
pub use datastructures::{Data, Files, QueryDict, UploadedFile};
pub use exception::Exception;
pub use http_request::HttpRequest;
pub use negotiation::{ContentNegotiation, DefaultContentNegotiation};
pub use param::{HttpRequestMethod, HttpVersion};
pub use parsers::{default_parsers, FormParser, JsonParser, MultiPartParser, Parser};
pub use request::{clone_request, Request};
pub use response::Response;
