use anyhow::{Context, Result};
use clap::Parser;
use segment_downloader::{
    config::AppConfig, logging, ChannelListener, DownloadEvent, DownloadState,
    DownloadTaskBuilder, SqliteSegmentStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// 断点续传多连接下载器
#[derive(Parser, Debug)]
#[command(name = "segment-dl", version, about, long_about = None)]
struct Args {
    /// 下载地址
    url: String,

    /// 保存的文件名（默认从响应头或地址推断）
    #[arg(short, long)]
    name: Option<String>,

    /// 保存目录（默认使用配置中的 default_save_dir）
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// 请求线程数（覆盖配置文件）
    #[arg(short, long)]
    threads: Option<usize>,

    /// 配置文件路径
    #[arg(short, long, default_value = "config/app.toml")]
    config: String,

    /// 以 JSON 行格式输出事件
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config).await;
    let log_guard = logging::init_logging(&config.log);

    if let Some(threads) = args.threads {
        config.download.thread_count = threads;
    }
    config.download.validate().context("下载配置无效")?;

    let store = SqliteSegmentStore::new(&config.persistence.db_path)
        .with_context(|| format!("打开分段数据库失败: {:?}", config.persistence.db_path))?;
    let (listener, mut events) = ChannelListener::new();

    let mut builder = DownloadTaskBuilder::new(args.url.clone())
        .config(config.download.clone())
        .store(Arc::new(store))
        .listener(Arc::new(listener));
    if let Some(name) = &args.name {
        builder = builder.file_name(name.clone());
    }
    if let Some(dir) = &args.dir {
        builder = builder.save_path(dir.clone());
    }
    let task = builder.build(Handle::current())?;

    info!("🚀 segment-dl 启动: {}", args.url);

    // 恢复已完成的任务时不重新下载
    task.init(false).await.context("初始化任务失败")?;
    let initial = task.state();
    if !matches!(initial, DownloadState::Succeeded | DownloadState::Failed) {
        let starter = task.clone();
        tokio::spawn(async move { starter.start().await });
    }

    let mut started = false;
    let mut interrupted = false;
    let mut outcome = initial;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                print_event(&event, args.json);

                if let DownloadEvent::StateChanged { state, .. } = &event {
                    let state = *state;
                    if state == DownloadState::Started {
                        started = true;
                        continue;
                    }
                    let terminal = match state {
                        DownloadState::Succeeded | DownloadState::Failed => true,
                        DownloadState::Paused | DownloadState::Stopped => started,
                        _ => false,
                    };
                    if terminal {
                        outcome = state;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    warn!("再次收到中断信号，直接退出");
                    drop(log_guard);
                    std::process::exit(130);
                }
                interrupted = true;
                info!("收到中断信号，暂停下载并保存进度...");
                let pauser = task.clone();
                tokio::spawn(async move { pauser.pause().await });
            }
        }
    }

    match outcome {
        DownloadState::Succeeded => {
            info!("✅ 下载完成: {:?}", task.key().save_file());
            Ok(())
        }
        DownloadState::Paused => {
            info!("⏸ 已暂停，再次运行相同命令即可继续下载");
            Ok(())
        }
        DownloadState::Failed => {
            warn!("❌ 下载失败: {}", args.url);
            // process::exit 不会运行析构，先刷新非阻塞日志写入器
            drop(log_guard);
            std::process::exit(1)
        }
        other => {
            warn!("下载结束于状态 {}", other);
            Ok(())
        }
    }
}

fn print_event(event: &DownloadEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("序列化事件失败: {}", e),
        }
        return;
    }

    let file = event.file();
    match event {
        DownloadEvent::StateChanged { state, .. } => {
            println!("[{}] {} -> {}", file.key.file_name, file.finished_bytes, state);
        }
        DownloadEvent::Progress { progress, .. } => {
            let eta = file
                .eta()
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "[{}] {:.1}% {}/{} bytes, {} B/s, 剩余 {}",
                file.key.file_name,
                file.progress_percent(),
                file.finished_bytes,
                file.key.file_size,
                progress.speed(),
                eta
            );
        }
        DownloadEvent::Error {
            kind,
            message,
            retryable,
            ..
        } => {
            eprintln!(
                "[{}] 错误 {:?}: {} (可重试: {})",
                file.key.file_name, kind, message, retryable
            );
        }
    }
}
