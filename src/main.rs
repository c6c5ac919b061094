// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 回显服务器
//!
//! 演示请求门面的多线程服务器：
//! - 每个连接读取完整的请求报文（受 `max_body_size` 限制）
//! - 通过门面完成内容协商、请求体解析与令牌认证
//! - 以 JSON 回显解析结果、身份，以及按方法克隆请求探测出的可用方法
//! - 后台管理控制台（CLI 指令交互）

use std::{
    cell::RefCell,
    net::{Ipv4Addr, SocketAddrV4},
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
};

use api_request::{
    authentication::Authenticator, clone_request, default_parsers, Config, Exception,
    HttpRequest, HttpRequestMethod, InMemoryUserStore, Request, Response, Settings,
    TokenAuthentication,
};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// # 程序入口点
///
/// 初始化日志、加载配置、构建运行时并启动主事件循环。
fn main() {
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        return;
    }

    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => config,
        Err(e) => {
            warn!("{}，使用默认配置", e);
            Config::new()
        }
    };
    info!("配置文件已载入");

    // 根据配置文件分配工作线程数
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads().max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建异步运行时：{}", e);
            return;
        }
    };

    runtime.block_on(serve(config));
}

async fn serve(config: Config) {
    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);

    let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("端口{}绑定完成", port);

    let config = Arc::new(config);
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let active_connection = Arc::new(AtomicU32::new(0));

    tokio::spawn(console(
        Arc::clone(&shutdown_flag),
        Arc::clone(&active_connection),
    ));

    let mut id: u128 = 0;
    loop {
        if shutdown_flag.load(Ordering::SeqCst) {
            info!("主循环接收到停机指令，正在退出...");
            break;
        }

        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("接受连接失败：{}", e);
                continue;
            }
        };
        debug!("[ID{}]新的连接：{}", id, addr);

        let active_connection = Arc::clone(&active_connection);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            active_connection.fetch_add(1, Ordering::SeqCst);
            handle_connection(&mut stream, id, &config).await;
            active_connection.fetch_sub(1, Ordering::SeqCst);
        });
        id += 1;
    }
}

/// 后台管理控制台：stop / status / help
async fn console(shutdown_flag: Arc<AtomicBool>, active_connection: Arc<AtomicU32>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                shutdown_flag.store(true, Ordering::SeqCst);
                println!("停机指令已激活，服务器将在处理完下一个请求后关闭...");
                break;
            }
            "status" => {
                println!("== Echo Server 状态 ===");
                println!("当前活跃连接数: {}", active_connection.load(Ordering::SeqCst));
                println!("======================");
            }
            "help" => {
                println!("== Echo Server Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("======================");
            }
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}

/// 从报文头部读取声明的 `Content-Length`
fn declared_content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// 读取完整的请求报文；超过上限时返回 `None`
async fn read_request(stream: &mut TcpStream, id: u128, max_body_size: usize) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        if let Some(i) = buffer
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        {
            let content_length = declared_content_length(&buffer[..i]);
            if content_length > max_body_size {
                warn!("[ID{}]请求体{}字节超过上限{}字节", id, content_length, max_body_size);
                return None;
            }
            if buffer.len() >= i + HEAD_TERMINATOR.len() + content_length {
                return Some(buffer);
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) => return Some(buffer),
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return Some(buffer);
            }
        }
        if buffer.len() > max_body_size + 64 * 1024 {
            warn!("[ID{}]请求报文超过上限", id);
            return None;
        }
    }
}

/// # 连接处理器
///
/// 读取请求、交给同步的 [`handle_request`] 处理，然后发送响应。
async fn handle_connection(stream: &mut TcpStream, id: u128, config: &Config) {
    let buffer = match read_request(stream, id, config.max_body_size()).await {
        Some(buffer) if buffer.is_empty() => return,
        Some(buffer) => buffer,
        None => {
            let mut response = Response::new();
            response.set_code(413);
            let _ = stream.write_all(&response.as_bytes()).await;
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();
    let response = handle_request(&buffer, id, config);
    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );

    let response_bytes = response.as_bytes();
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}

/// 处理单个请求。门面持有 `Rc`，整个处理过程是同步的。
fn handle_request(buffer: &[u8], id: u128, config: &Config) -> Response {
    let raw = match HttpRequest::try_from(buffer, id) {
        Ok(raw) => RefCell::new(raw),
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            return Response::from_exception(&e);
        }
    };

    let settings = Settings::from_config(config);
    let store = InMemoryUserStore::from_tokens(config.tokens());
    let authenticators: Vec<Rc<dyn Authenticator>> = vec![Rc::new(TokenAuthentication::new(store))];
    let mut request = Request::new(&raw, default_parsers(), authenticators, &settings);
    request.set_accepted_renderer("json");
    request.set_accepted_media_type("application/json");

    let response = match echo(&mut request) {
        Ok(response) => response,
        Err(e) => {
            warn!("[ID{}]请求处理失败：{}", id, e);
            let mut response = Response::from_exception(&e);
            if e.status_code() == 401 {
                response.set_www_authenticate(request.authenticate_header());
            }
            response
        }
    };

    info!(
        "[ID{}] {}, {}, {}, {}, {}",
        id,
        request.path(),
        request.method(),
        response.status_code(),
        response.information(),
        request.user_agent().unwrap_or_default(),
    );
    response
}

/// 已认证可以使用任意方法，否则只允许安全方法
fn has_permission(request: &mut Request<'_>) -> Result<bool, Exception> {
    if request.method().is_safe() {
        return Ok(true);
    }
    Ok(request.user()?.map_or(false, |user| user.is_authenticated()))
}

/// 以每种方法克隆请求并检查权限，克隆不会重新认证
fn allowed_methods(request: &Request<'_>) -> Result<Vec<HttpRequestMethod>, Exception> {
    let mut allowed = Vec::new();
    for method in HttpRequestMethod::ALL {
        let mut probe = clone_request(request, method);
        if has_permission(&mut probe)? {
            allowed.push(method);
        }
    }
    Ok(allowed)
}

fn echo(request: &mut Request<'_>) -> Result<Response, Exception> {
    // 先认证，之后的克隆都复用这次的结果
    request.user()?;
    let allowed = allowed_methods(request)?;

    if !has_permission(request)? {
        return Err(Exception::NotAuthenticated);
    }

    if request.method() == HttpRequestMethod::Options {
        let mut response = Response::new();
        response.set_code(204).set_allow(allowed);
        return Ok(response);
    }

    let data = request.data()?.to_json();
    let mut files = Map::new();
    for (key, uploads) in request.files()?.iter() {
        let uploads: Vec<Value> = uploads.iter().map(|f| f.to_json()).collect();
        files.insert(key.to_string(), Value::Array(uploads));
    }
    let user = request.user()?.map(|u| u.username().to_string());
    let auth = request.auth()?.map(|t| t.key().to_string());
    let authenticator = request
        .successful_authenticator()?
        .map(|a| a.name().to_string());

    let body = json!({
        "method": request.method().to_string(),
        "path": request.path(),
        "query": request.query_params().to_json(),
        "content_type": request.content_type(),
        "data": data,
        "files": files,
        "user": user,
        "auth": auth,
        "authenticator": authenticator,
        "allowed_methods": allowed.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
    });
    let mut response = Response::from_json(200, &body);
    response.set_allow(allowed);
    Ok(response)
}
