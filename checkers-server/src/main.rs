use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkers_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("checkers_server=debug".parse()?))
        .init();

    info!("国际跳棋服务端启动中...");

    let config = ServerConfig::from_env()?;
    info!(?config, "配置已加载");

    let server = Server::bind(config).await?;
    server.run().await
}
