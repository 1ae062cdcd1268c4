//! dualplay - 播放器冒烟测试
//!
//! 主线程先 play，步骤线程再依次执行 pause / play / pause / play_over / stop / play（无限循环），
//! 每步间隔 INTERVAL_MS，之后等待播放结束；Ctrl+C 关闭播放器。

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use dualplay::audio::{OutputConfig, OutputTarget};
use dualplay::player::{
    create_player, create_player_with, AudioPlayer, AudioSource, Backend, PlayerConfig,
    PlayerError, StatusListener,
};

/// 默认步骤间隔（毫秒）
const DEFAULT_INTERVAL_MS: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// Try the clip backend first, fall back to media
    Auto,
    Clip,
    Media,
}

/// dualplay - audio player smoke test
#[derive(Parser)]
#[command(name = "dualplay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Audio file (path or file:// URL)
    #[arg(value_name = "FILE")]
    file: String,

    /// Time between steps in milliseconds
    #[arg(value_name = "INTERVAL_MS", allow_negative_numbers = true)]
    interval_ms: Option<i64>,

    /// Select output device by name
    #[arg(short, long)]
    device: Option<String>,

    /// Render to a silent wall-clock output instead of a device
    #[arg(long, conflicts_with = "device")]
    null_output: bool,

    /// Playback backend
    #[arg(short = 'B', long, value_enum, default_value = "auto")]
    backend: BackendChoice,

    /// Media backend buffer size in milliseconds
    #[arg(short, long, default_value = "2000")]
    buffer_ms: u32,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn interval(&self) -> Duration {
        let ms = match self.interval_ms {
            Some(ms) if ms > 0 => ms,
            _ => DEFAULT_INTERVAL_MS,
        };
        Duration::from_millis(ms as u64)
    }

    fn player_config(&self) -> PlayerConfig {
        let target = if self.null_output {
            OutputTarget::Null
        } else if let Some(name) = &self.device {
            OutputTarget::Named(name.clone())
        } else {
            OutputTarget::DefaultDevice
        };

        PlayerConfig {
            output: OutputConfig {
                target,
                ..Default::default()
            },
            buffer_ms: self.buffer_ms,
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let source: AudioSource = cli.file.parse()?;
    let interval = cli.interval();
    let config = cli.player_config();

    println!("Test file: {}", source);
    println!("Waiting time: {} ms", interval.as_millis());

    let player = match cli.backend {
        BackendChoice::Auto => create_player(&source, &config),
        BackendChoice::Clip => create_player_with(Backend::Clip, &source, &config),
        BackendChoice::Media => create_player_with(Backend::Media, &source, &config),
    }
    .with_context(|| format!("Failed to create a player for {}", source))?;
    let player: Arc<dyn AudioPlayer> = Arc::from(player);

    println!("Player backend: {}", player.backend());
    if let Some(length) = player.audio_length() {
        println!("Audio length: {:.2}s", length.as_secs_f64());
    }

    let listener: StatusListener = Arc::new(|previous, current| {
        log::info!("Status {:?} -> {}", previous, current);
    });
    player.set_status_listener(Some(listener));

    {
        let player = Arc::clone(&player);
        ctrlc::set_handler(move || {
            println!("\nInterrupted, closing player.");
            player.close();
        })?;
    }

    // 第一步在主线程执行，之后的等待不会在播放开始前返回
    begin(player.as_ref())?;

    let worker = {
        let player = Arc::clone(&player);
        thread::Builder::new()
            .name("smoke-steps".to_string())
            .spawn(move || -> Result<(), PlayerError> {
                run_steps(player.as_ref(), interval)?;
                player.wait_for_playing()
            })?
    };

    // 两个线程都等待播放结束
    player.wait_for_playing()?;

    match worker.join() {
        Ok(Ok(())) | Ok(Err(PlayerError::Closed)) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => anyhow::bail!("step thread panicked"),
    }

    player.close();
    println!("Done.");
    Ok(())
}

/// 无限循环播放，执行第一步 play
fn begin(player: &dyn AudioPlayer) -> Result<(), PlayerError> {
    player.set_play_count(0);
    println!("play [position {:.2}s]", player.audio_position().as_secs_f64());
    player.play()
}

/// 按顺序执行其余测试步骤，每步之前等待 `interval`
fn run_steps(player: &dyn AudioPlayer, interval: Duration) -> Result<(), PlayerError> {
    let steps: [(&str, fn(&dyn AudioPlayer) -> Result<(), PlayerError>); 6] = [
        ("pause", |p| p.pause()),
        ("play", |p| p.play()),
        ("pause", |p| p.pause()),
        ("play over", |p| p.play_over()),
        ("stop", |p| p.stop()),
        ("play (loop forever)", |p| p.play()),
    ];

    for (name, step) in steps {
        thread::sleep(interval);
        println!("{} [position {:.2}s]", name, player.audio_position().as_secs_f64());
        step(player)?;
    }

    Ok(())
}
