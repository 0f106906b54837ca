/// UniJ - Client
/// 
/// 连接到 UniJ Server，注册可被服务端调用的过程，并在就绪后调用服务端的过程

use tracing::info;
use unij_common::ws_rpc::client;
use unij_common::Channel;

mod config;
mod demo;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenvy::dotenv().ok();
    let cfg = config::Config::from_env()?;

    // 初始化日志
    // 可以通过环境变量 RUST_LOG 设置日志级别，例如：
    // RUST_LOG=unij_common=debug cargo run
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动 UniJ Client...");
    info!("✅ 配置加载成功");

    // 创建通道，连接前注册好过程和就绪回调
    let (channel, outbound) = Channel::new();
    demo::register_procedures(&channel);

    let desired_name = cfg.client_name.clone();
    channel.on_ready(move |channel| demo::on_ready(channel, &desired_name));

    info!("🎯 连接到 Server: {}", cfg.server_ws_url);

    // 运行直到连接关闭
    let reason = client::run(&cfg.server_ws_url, channel.clone(), outbound).await?;
    info!("连接已结束，最终名称: {}，原因: {}", channel.client_name(), reason);

    Ok(())
}
