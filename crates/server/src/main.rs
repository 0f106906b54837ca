/// UniJ - Server
///
/// 对端权威：接受客户端的 WebSocket 连接，分配名称并提供可被远程调用的过程

mod app_state;
mod config;
mod demo;
mod ws;

use axum::{
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;
use crate::{
    app_state::AppState,
    ws::ClientHub,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let cfg = config::Config::from_env()?;

    // 初始化日志
    // 可以通过环境变量 RUST_LOG 覆盖日志级别，例如：
    // RUST_LOG=unij_server=debug cargo run
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动 UniJ Server...");
    info!("✅ 配置加载成功");

    // 初始化客户端连接池
    let client_hub = ClientHub::new(cfg.max_clients);
    demo::register_procedures(&client_hub);
    info!("✅ 客户端连接池初始化成功，已注册过程: {:?}", client_hub.list_procedures());

    // 创建应用状态
    let app_state = AppState::new(client_hub.clone());

    // 设置CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 构建应用路由
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route(&cfg.ws_path, get(ws::handle_client_websocket));

    app = match &cfg.static_file_dir {
        Some(dir) => {
            info!("📁 静态文件目录: {}", dir);
            app.fallback_service(ServeDir::new(dir))
        }
        None => app.route("/", get(root_handler)),
    };

    let app = app
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state);

    // 运行示例脚本
    tokio::spawn(demo::run_scenario(client_hub.clone()));

    // 启动服务器
    let addr: SocketAddr = format!("{}:{}", cfg.server_host, cfg.server_port).parse()?;
    info!("🎯 服务器监听在 http://{}，WebSocket 路径: {}", addr, cfg.ws_path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("服务器已停止，在线客户端: {:?}", client_hub.client_names());
    Ok(())
}

async fn root_handler() -> &'static str {
    "UniJ Server"
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
    }
    info!("收到退出信号");
}
