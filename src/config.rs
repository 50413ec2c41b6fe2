use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 语音生成服务配置
    pub api_base_url: &'static str,
    pub tts_model: &'static str,
    pub api_key_env: &'static str,
    pub phrase_template: &'static str,
    pub request_timeout_ms: u64,

    // 服务端返回的 PCM 格式（不在字节流中自描述，双方约定）
    pub sample_rate: u32,
    pub channels: u16,

    // ALSA 播放配置
    pub playback_device: &'static str,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // 数字键盘
    pub max_digits: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            api_base_url: env!("SPEECH_API_BASE_URL"),
            tts_model: env!("SPEECH_MODEL"),
            api_key_env: env!("SPEECH_API_KEY_ENV"),
            phrase_template: env!("SPEECH_PHRASE_TEMPLATE"),
            request_timeout_ms: env!("SPEECH_REQUEST_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse SPEECH_REQUEST_TIMEOUT_MS")?,

            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            channels: env!("AUDIO_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,

            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            playback_sample_rate: env!("AUDIO_PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("AUDIO_PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_CHANNELS")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,

            max_digits: env!("KEYPAD_MAX_DIGITS").parse()
                .map_err(|_| "Failed to parse KEYPAD_MAX_DIGITS")?,
        })
    }

    /// 运行时读取 API Key，凭证不写入编译产物
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
