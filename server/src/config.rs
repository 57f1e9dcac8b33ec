use clap::Parser;

/// Command-line configuration for the conferencing server (spec §6.1, §5).
#[derive(Parser, Debug, Clone)]
#[command(name = "confd", about = "LAN conferencing server")]
pub struct Config {
    /// Interface to bind every endpoint on.
    #[arg(long, default_value = "0.0.0.0", env = "CONFD_BIND_ADDR")]
    pub bind_addr: String,

    #[arg(long, default_value_t = 5000)]
    pub control_port: u16,

    #[arg(long, default_value_t = 5001)]
    pub video_port: u16,

    #[arg(long, default_value_t = 5002)]
    pub audio_port: u16,

    #[arg(long, default_value_t = 5003)]
    pub screen_control_port: u16,

    #[arg(long, default_value_t = 5004)]
    pub screen_data_port: u16,

    #[arg(long, default_value_t = 5005)]
    pub file_port: u16,

    /// Maximum simultaneous participants (spec §4.2).
    #[arg(long, default_value_t = 10)]
    pub max_users: usize,

    /// Maximum accepted upload size in bytes (spec §4.7).
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    pub max_file_size: u64,

    /// Registration handshake window, seconds (spec §5).
    #[arg(long, default_value_t = 5)]
    pub registration_timeout_secs: u64,

    /// Upload idle-read window, seconds (spec §5).
    #[arg(long, default_value_t = 30)]
    pub upload_timeout_secs: u64,

    /// Download write window, seconds (spec §5).
    #[arg(long, default_value_t = 30)]
    pub download_timeout_secs: u64,

    /// Datagram endpoint rebind grace interval, seconds (spec §4.2).
    #[arg(long, default_value_t = 5)]
    pub rebind_grace_secs: u64,

    /// Audio samples per mixer tick (spec §6.4).
    #[arg(long, default_value_t = 1024)]
    pub chunk_samples: usize,

    /// Audio sample rate, used only to size the mixer tick interval (spec §6.4).
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Staleness horizon for audio buckets, milliseconds (spec §4.5).
    #[arg(long, default_value_t = 1_000)]
    pub audio_staleness_ms: u64,

    /// Maximum accepted screen datagram size in bytes (spec §4.6).
    #[arg(long, default_value_t = 65_000)]
    pub max_screen_datagram: usize,

    /// Listen address for the Prometheus `/metrics` endpoint.
    #[arg(long, default_value = "0.0.0.0:9100", env = "CONFD_METRICS_ADDR")]
    pub metrics_listen: String,
}

impl Config {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.control_port)
    }

    pub fn video_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.video_port)
    }

    pub fn audio_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.audio_port)
    }

    pub fn screen_control_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.screen_control_port)
    }

    pub fn screen_data_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.screen_data_port)
    }

    pub fn file_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.file_port)
    }

    /// `≈ CHUNK_SAMPLES / SAMPLE_RATE` (spec §4.5).
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.chunk_samples as f64 / self.sample_rate as f64)
    }

    /// A config for tests: every port 0 (OS-assigned), a short mixer tick,
    /// and tight timeouts so a hung test fails fast instead of fast enough.
    pub fn for_test() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            control_port: 0,
            video_port: 0,
            audio_port: 0,
            screen_control_port: 0,
            screen_data_port: 0,
            file_port: 0,
            max_users: 10,
            max_file_size: 16 * 1024 * 1024,
            registration_timeout_secs: 5,
            upload_timeout_secs: 5,
            download_timeout_secs: 5,
            rebind_grace_secs: 5,
            chunk_samples: 4,
            sample_rate: 4_000,
            audio_staleness_ms: 1_000,
            max_screen_datagram: 65_000,
            metrics_listen: "127.0.0.1:0".to_string(),
        }
    }
}
