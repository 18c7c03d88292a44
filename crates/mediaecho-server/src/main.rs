use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use mediaecho_core::codec::DecoderOutputs;
use mediaecho_core::{
    LoopbackTransport, NetemConfig, PassthroughDecoder, PassthroughEncoder, RawFrame, Session,
    SessionConfig,
};
use mediaecho_types::{EncoderConfig, ScalabilityMode};

fn env_parse<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .parse()
        .with_context(|| format!("invalid {}", key))
}

fn codec_string(name: &str) -> anyhow::Result<&'static str> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "h264" => "avc1.42002A",
        "h265" => "hev1.1.6.L93.B0",
        "vp8" => "vp8",
        "vp9" => "vp09.00.10.08",
        "av1" => "av01.0.08M.08.0.110.09",
        other => bail!("unknown codec {:?} (expected vp8, vp9, h264, h265 or av1)", other),
    })
}

/// Synthetic I420-sized frames with a moving gradient.
fn synthetic_frame(index: u64, width: u32, height: u32, framerate: f64) -> RawFrame {
    let size = (width as usize * height as usize * 3) / 2;
    let data: Vec<u8> = (0..size)
        .map(|i| ((i as u64 + index * 3) % 256) as u8)
        .collect();
    RawFrame {
        timestamp: (index as f64 * 1_000_000.0 / framerate) as u64,
        width,
        height,
        data: Bytes::from(data),
    }
}

async fn count_decoded(decoded: &mut DecoderOutputs, want: u64) -> u64 {
    let mut got = 0;
    while got < want {
        match decoded.recv().await {
            Some(Ok(_)) => {
                got += 1;
                if got % 30 == 0 {
                    info!(decoded = got, "decode progress");
                }
            }
            Some(Err(e)) => warn!("decoder output error: {}", e),
            None => break,
        }
    }
    got
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediaecho=debug".into()),
        )
        .init();

    // Config
    let codec = codec_string(&std::env::var("MEDIAECHO_CODEC").unwrap_or_else(|_| "vp8".into()))?;
    let width: u32 = env_parse("MEDIAECHO_WIDTH", "320")?;
    let height: u32 = env_parse("MEDIAECHO_HEIGHT", "240")?;
    let bitrate: u64 = env_parse("MEDIAECHO_BITRATE", "1000000")?;
    let framerate: f64 = env_parse("MEDIAECHO_FRAMERATE", "30")?;
    let key_interval: u32 = env_parse("MEDIAECHO_KEY_INTERVAL", "3000")?;
    let frames: u64 = env_parse("MEDIAECHO_FRAMES", "300")?;
    let mode = std::env::var("MEDIAECHO_SCALABILITY_MODE").unwrap_or_else(|_| "L1T1".into());
    let scalability_mode = ScalabilityMode::parse(&mode)
        .with_context(|| format!("invalid MEDIAECHO_SCALABILITY_MODE {:?}", mode))?;
    let delay_ms: u64 = env_parse("MEDIAECHO_DELAY_MS", "10")?;
    let jitter_ms: u64 = env_parse("MEDIAECHO_JITTER_MS", "5")?;
    let loss_percent: f64 = env_parse("MEDIAECHO_LOSS_PERCENT", "0")?;
    let max_frame_bytes: usize = env_parse("MEDIAECHO_MAX_FRAME_BYTES", "200000")?;
    let gap_timeout_ms: u64 = env_parse("MEDIAECHO_REORDER_GAP_TIMEOUT_MS", "0")?;

    if framerate <= 0.0 {
        bail!("MEDIAECHO_FRAMERATE must be positive");
    }

    let ssrc: u32 = rand::random();
    let mut encoder_config = EncoderConfig::new(codec, width, height, ssrc)
        .with_context(|| format!("no payload type for codec {}", codec))?;
    encoder_config.bitrate = bitrate;
    encoder_config.framerate = framerate;
    encoder_config.key_interval = key_interval;
    if scalability_mode != ScalabilityMode::L1T1 {
        encoder_config.scalability_mode = Some(scalability_mode);
    }

    let session_config = SessionConfig {
        max_frame_bytes,
        reorder_gap_timeout: (gap_timeout_ms > 0).then(|| Duration::from_millis(gap_timeout_ms)),
        ..Default::default()
    };

    let transport = Arc::new(LoopbackTransport::new(NetemConfig {
        base_delay: Duration::from_millis(delay_ms),
        jitter: Duration::from_millis(jitter_ms),
        loss_percent,
        ..Default::default()
    }));

    info!(
        "mediaecho session {:08x}: {} {}x{} @ {} fps, {} frames",
        ssrc, codec, width, height, framerate, frames
    );

    let mut session = Session::new(transport, ssrc, session_config);
    let (encoder, encoded) = PassthroughEncoder::new();
    let (decoder, mut decoded) = PassthroughDecoder::new();
    let (frames_tx, frames_rx) = mpsc::channel(8);
    session
        .start(encoder, encoded, decoder, encoder_config, frames_rx)
        .await?;

    // Frame source
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / framerate));
        for index in 0..frames {
            ticker.tick().await;
            if frames_tx
                .send(synthetic_frame(index, width, height, framerate))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let deadline = Duration::from_secs_f64(frames as f64 / framerate) + Duration::from_secs(5);
    let outcome = tokio::select! {
        result = session.supervise() => result.map(|_| None),
        got = tokio::time::timeout(deadline, count_decoded(&mut decoded, frames)) => Ok(got.ok()),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(None)
        }
    };

    match &outcome {
        Ok(Some(got)) => info!(decoded = got, wanted = frames, "echo complete"),
        Ok(None) => warn!("not all frames were decoded before the session ended or timed out"),
        Err(e) => warn!("session failed: {}", e),
    }

    if let Some(report) = session.stop().await {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    outcome?;
    Ok(())
}
