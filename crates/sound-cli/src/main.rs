//! sound-cli: play a WAV file through [`sound_player::Player`] on a CPAL device.
//!
//! With `--notify`, the notification is played first: the main stream is saved
//! on the player's stream stack, the notification plays to its end, and the
//! main stream is restored and started.

mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use crossbeam_channel::Receiver;
use sound_player::cpal_sink::CpalSink;
use sound_player::stream;
use sound_player::wav::WavStream;
use sound_player::{Player, device};
use tracing_subscriber::EnvFilter;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// How a wait on a playing session ended.
#[derive(Debug, PartialEq, Eq)]
enum WaitOutcome {
    Finished,
    Interrupted,
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sound_player=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for name in device::list_device_names(&host)? {
            println!("{name}");
        }
        return Ok(());
    }

    let path = args
        .path
        .as_deref()
        .ok_or_else(|| anyhow!("missing input path"))?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let mut player = Player::new(args.device.clone(), CpalSink::new())
        .with_config(args.player_config());

    let main_stream = stream::shared(open_wav(path)?);
    player.set_stream(Some(main_stream));

    if let Some(notify) = args.notify.as_deref() {
        player.save_stream();
        player.set_stream(Some(stream::shared(open_wav(notify)?)));
        tracing::info!(path = %notify.display(), "playing notification");
        start(&mut player)?;
        let outcome = wait_for_end(&player, &stop_rx);
        player.stop();
        player.restore_stream();
        if outcome == WaitOutcome::Interrupted {
            return Ok(());
        }
    }

    if let Some(pos) = args.seek {
        player.set_play_pos(pos);
    }
    tracing::info!(
        path = %path.display(),
        total = %sound_player::PlaybackPosition::from_seconds(player.total_seconds()),
        "playing"
    );
    start(&mut player)?;
    wait_for_end(&player, &stop_rx);
    player.stop();

    let message = player.error_msg();
    if message != sound_player::player::SUCCESS {
        tracing::warn!(%message, "playback ended with error");
    }
    Ok(())
}

fn open_wav(path: &Path) -> Result<WavStream> {
    WavStream::open(path).with_context(|| format!("load {}", path.display()))
}

fn start(player: &mut Player<CpalSink>) -> Result<()> {
    if player.start() {
        Ok(())
    } else {
        Err(anyhow!(player.error_msg())).context("start playback")
    }
}

/// Log the position once per interval until the session ends or Ctrl-C arrives.
fn wait_for_end(player: &Player<CpalSink>, stop_rx: &Receiver<()>) -> WaitOutcome {
    loop {
        if stop_rx.recv_timeout(PROGRESS_INTERVAL).is_ok() {
            tracing::info!("stop requested");
            return WaitOutcome::Interrupted;
        }
        if !player.is_playing() {
            return WaitOutcome::Finished;
        }
        tracing::info!(
            position = %player.current_pos(),
            total = player.total_seconds(),
            "progress"
        );
    }
}
