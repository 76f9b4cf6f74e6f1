use std::path::PathBuf;

use clap::Parser;

use triage::store::RecordId;

#[derive(Parser, Debug)]
#[command(
    name = "triage",
    version,
    about = "客服邮件分拣智能体：为每个线程启动 Worker 起草回复"
)]
pub struct Cli {
    /// 覆盖默认配置的 TOML 文件
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// 写入一个退货政策演示线程并一并处理
    #[arg(long)]
    pub demo: bool,
    #[arg(value_name = "THREAD_ID", required_unless_present = "demo")]
    pub thread_ids: Vec<RecordId>,
}
