// slicekit 诊断工具
//
// 读取应用清单，打印切片树，或启动整棵树并报告提供者与共享资源的状态。

use anyhow::Context;
use clap::{Parser, Subcommand};
use slicekit::logging::{init_logging, LoggingConfig};
use slicekit::{AppManifest, Application, ContainerError, Slice};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "slicekit")]
#[command(about = "slicekit - 分层组件容器诊断工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 打印切片树、导入规则、提供者与已注册的键
    Inspect {
        /// 应用清单路径
        manifest: PathBuf,
    },
    /// 启动全部提供者并报告结果
    Boot {
        /// 应用清单路径
        manifest: PathBuf,

        /// 启动超时（毫秒）
        #[arg(short, long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LoggingConfig::development()
    } else {
        LoggingConfig::production()
    };
    if let Err(err) = init_logging(logging) {
        eprintln!("⚠️  日志初始化失败: {}", err);
    }

    match cli.command {
        Commands::Inspect { manifest } => {
            let app = load(&manifest)?;
            print_slice(app.root(), 0);
        }
        Commands::Boot { manifest, timeout_ms } => {
            let app = load(&manifest)?;
            if let Err(err) = app.boot_with_timeout(Duration::from_millis(timeout_ms)).await {
                err.log();
                eprintln!("{}", err.user_message());
                std::process::exit(1);
            }

            println!("🚀 {} 已启动 ({})", app.name(), app.context().boot_mode());
            for provider in app.providers() {
                println!("  {:<32} {}", provider.qualified_name(), provider.state());
            }
            println!("🔌 共享资源: {}", app.context().resources().len());

            app.shutdown().context("failed to stop providers")?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Application> {
    let manifest = AppManifest::load(path)
        .with_context(|| format!("failed to load manifest {}", path.display()))?;
    Application::from_manifest(&manifest).map_err(|err: ContainerError| {
        eprintln!("{}", err.user_message());
        anyhow::Error::new(err)
    })
}

fn print_slice(slice: &Slice, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}📦 {}", indent, slice.qualified_name());

    for provider in slice.providers() {
        println!(
            "{}  ⚙️  provider {} [{}] family={}",
            indent,
            provider.name(),
            provider.state(),
            provider.family()
        );
    }
    for key in slice.declared_imports() {
        println!("{}  ⬇️  import {}", indent, key);
    }
    for key in slice.registry().keys() {
        println!("{}  • {}", indent, key);
    }
    for child in slice.children() {
        print_slice(&child, depth + 1);
    }
}
