use std::path::Path;

use vidcache_media::ToolInvocation;
use vidcache_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "vidcache-selfcheck: starting with cache_root={}",
        config.cache_root.display()
    );
    config.validate()?;
    ensure_cache_root(&config.cache_root).await?;
    ensure_tool(&ToolInvocation::parse(&config.ffmpeg_command, "ffmpeg"))?;
    ensure_tool(&ToolInvocation::parse(&config.ffprobe_command, "ffprobe"))?;
    ensure_env_present(&["REDIS_URL"])?;

    println!("vidcache-selfcheck: ok");
    Ok(())
}

async fn ensure_cache_root<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_tool(tool: &ToolInvocation) -> anyhow::Result<()> {
    tool.check()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", tool.program, e))
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
