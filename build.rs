use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    speech: Speech,
    audio: Audio,
    keypad: Keypad,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Speech {
    api_base_url: String,
    model: String,
    api_key_env: String,
    phrase_template: String,
    request_timeout_ms: u64,
}

#[derive(Deserialize)]
struct Audio {
    sample_rate: u32,
    channels: u16,
    playback_device: String,
    playback_sample_rate: u32,
    playback_channels: u32,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Keypad {
    max_digits: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 语音服务配置
    println!("cargo:rustc-env=SPEECH_API_BASE_URL={}", config.speech.api_base_url);
    println!("cargo:rustc-env=SPEECH_MODEL={}", config.speech.model);
    println!("cargo:rustc-env=SPEECH_API_KEY_ENV={}", config.speech.api_key_env);
    println!("cargo:rustc-env=SPEECH_PHRASE_TEMPLATE={}", config.speech.phrase_template);
    println!("cargo:rustc-env=SPEECH_REQUEST_TIMEOUT_MS={}", config.speech.request_timeout_ms);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_SAMPLE_RATE={}", config.audio.playback_sample_rate);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_CHANNELS={}", config.audio.playback_channels);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);

    // 键盘输入限制
    println!("cargo:rustc-env=KEYPAD_MAX_DIGITS={}", config.keypad.max_digits);

    link_speexdsp();
}

// ALSA 动态链接由 alsa-sys 自动处理，speexdsp 的重采样器需要手动链接
fn link_speexdsp() {
    let target = std::env::var("TARGET").unwrap_or_default();

    if target.contains("musl") {
        // musl 目标：使用手动编译的静态库，不依赖 pkg-config
        if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
            println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
        }
        println!("cargo:rustc-link-lib=static=speexdsp");
        return;
    }

    pkg_config::Config::new()
        .probe("speexdsp")
        .expect("Failed to find speexdsp. Please install libspeexdsp-dev.");
}
