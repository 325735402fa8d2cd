use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sound_player::{PlaybackPosition, PlayerConfig};

#[derive(Parser, Debug)]
#[command(name = "sound-cli", version)]
pub struct Args {
    /// Path to a WAV file
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Output device, by substring match ("default" for the host default)
    #[arg(long, default_value = "default")]
    pub device: String,

    /// Audio written per chunk, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub chunk_ms: u64,

    /// Requested hardware buffer time in microseconds
    #[arg(long, default_value_t = 50_000)]
    pub buffer_time_us: u32,

    /// Consecutive failed writes tolerated before the session ends (0 = retry forever)
    #[arg(long, default_value_t = 64)]
    pub max_write_retries: u32,

    /// Start position, as SS, M:SS or H:MM:SS
    #[arg(long)]
    pub seek: Option<PlaybackPosition>,

    /// WAV file played to completion before the main file
    #[arg(long)]
    pub notify: Option<PathBuf>,
}

impl Args {
    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            chunk: Duration::from_millis(self.chunk_ms.max(1)),
            buffer_time_us: self.buffer_time_us,
            max_write_retries: (self.max_write_retries > 0).then_some(self.max_write_retries),
            ..PlayerConfig::default()
        }
    }
}
