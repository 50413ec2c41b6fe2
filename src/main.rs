use numpad_speaker::audio::{AudioConfig, AudioSystem};
use numpad_speaker::config::Config;
use numpad_speaker::keypad::{self, Entry};
use numpad_speaker::pipeline::SpeakerSession;
use numpad_speaker::speech::{ApiKey, GeminiClient};
use anyhow::Context;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();
    log::debug!("Config: {}", serde_json::to_string(&config)?);

    // 凭证在运行时注入，缺失时直接提示用户
    let key = match config.api_key_from_env() {
        Some(k) => ApiKey::new(k),
        None => {
            anyhow::bail!(
                "API key required: set {} before starting {}",
                config.api_key_env,
                config.app_name
            );
        }
    };

    let generator = Arc::new(GeminiClient::from_config(&config)?);

    // 打开音频设备，整个会话期间持有，退出时释放
    let mut audio_system = AudioSystem::start(AudioConfig::from(&config))
        .context("Failed to start audio output")?;
    let playback = audio_system
        .handle()
        .context("Audio system stopped unexpectedly")?;

    let session = SpeakerSession::from_config(&config, generator, key, playback);

    println!(
        "{} {} ready. Type a number and press Enter (q to quit).",
        config.app_name, config.app_version
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // 整个会话共用一个 SIGINT 监听，等待请求时也能响应 Ctrl+C
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = sigint.recv() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break, // EOF
                };

                let number = match keypad::parse_entry(&line, config.max_digits) {
                    Ok(Entry::Number(n)) => n,
                    Ok(Entry::Empty) => continue,
                    Ok(Entry::Quit) => break,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };

                println!("Generating...");
                let outcome = session
                    .speak_until(&number, async {
                        sigint.recv().await;
                    })
                    .await;
                match outcome {
                    None => {
                        println!("Received Ctrl+C, shutting down...");
                        break;
                    }
                    Some(Ok(spoken)) => {
                        log::info!("Spoke \"{}\" ({:.2}s)", spoken.phrase, spoken.duration_secs);
                    }
                    Some(Err(e)) if e.is_credential_problem() => {
                        // 凭证问题：提示用户更换 Key 后重新启动
                        eprintln!(
                            "API key error: {}. Set a valid key in {} and restart.",
                            e, config.api_key_env
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        eprintln!("Error speaking number: {}", e);
                    }
                }
            }
        }
    }

    drop(session);
    audio_system.stop();
    Ok(())
}
