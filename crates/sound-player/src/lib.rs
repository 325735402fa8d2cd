pub mod clock;
pub mod config;
pub mod cpal_sink;
pub mod device;
pub mod error;
pub mod negotiate;
pub mod player;
pub mod position;
pub mod queue;
pub mod sink;
pub mod status;
pub mod stream;
pub mod wav;

#[cfg(test)]
mod test_support;

pub use config::PlayerConfig;
pub use error::PlayerError;
pub use player::Player;
pub use position::PlaybackPosition;
pub use stream::{SharedStream, SoundStream};
