use std::sync::Arc;
use std::time::Duration;

use reef_server::{BackgroundTasks, Config, MemoryOrderRepository, ServerState, print_banner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 环境与日志
    dotenv::dotenv().ok();
    reef_server::init_logger();

    print_banner();
    tracing::info!("Reef server starting...");

    // 2. 加载配置
    let config = Config::from_env();

    // 3. 初始化服务状态
    // 订单仓储：生产环境换成数据库实现，这里是单机内存实现
    let repo = Arc::new(MemoryOrderRepository::new());
    let state = ServerState::initialize(&config, repo).await?;

    // 4. 启动后台任务（订单消费 worker）
    let mut tasks = BackgroundTasks::new();
    state.start_background_tasks(&mut tasks).await?;
    tracing::info!(tasks = tasks.len(), "Background tasks started");

    // 5. 等待退出信号，优雅关闭
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    tasks
        .shutdown(Duration::from_millis(config.shutdown_timeout_ms))
        .await;

    Ok(())
}
