use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vpl_encode::{
    device::stub::StubDevice, EncodeModule, EncoderConfig, Frame, PixelLayout,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const FRAMES: u32 = 60;

/// A diagonal gradient that moves a few pixels every frame.
fn synthetic_frame(n: u32) -> Result<Frame> {
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let v = ((x + y + n * 4) % 256) as u8;
            data.extend_from_slice(&[v, 255 - v, (y % 256) as u8]);
        }
    }
    Ok(Frame::packed(WIDTH, HEIGHT, PixelLayout::Bgr8, data)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let output = args.next().unwrap_or_else(|| "out.hevc".to_string());
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {path}"))?;
            EncoderConfig::from_json(&json)?
        }
        None => EncoderConfig::new(WIDTH, HEIGHT),
    };

    let mut module = EncodeModule::with_config(StubDevice::new(), config, &output)
        .context("Failed to create encoder")?;

    let frame_interval = Duration::from_millis(100);
    for n in 0..FRAMES {
        let start = Instant::now();
        if !module.push(synthetic_frame(n)?) {
            tracing::warn!(n, "Frame rejected");
        }
        if let Some(Err(e)) = module.poll_exit() {
            anyhow::bail!("Encoder stopped: {e}");
        }
        std::thread::sleep(frame_interval.saturating_sub(start.elapsed()));
    }

    let stats = module.finish()?;
    tracing::info!(?stats, %output, "Done");

    Ok(())
}
