//! 空气质量监测数据生成器：按时间范围与粒度并发合成读数，批量写入 PostgreSQL。

mod prompt;
mod run;
mod signal;

use aq_config::{AppConfig, RunRequest};
use aq_telemetry::init_tracing;
use prompt::Prompt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 任务参数优先取环境变量，否则交互输入
    let request = match RunRequest::from_env()? {
        Some(request) => request,
        None => {
            let stdin = std::io::stdin();
            Prompt::new(stdin.lock(), std::io::stdout()).ask_request()?
        }
    };

    run::execute(&config, &request).await?;
    Ok(())
}
