#[cfg(not(feature = "sim"))]
fn main() {
    eprintln!(
        "The spatial-sink demo requires the \"sim\" feature. Rebuild with `--features sim` to enable it."
    );
}

#[cfg(feature = "sim")]
mod cli {
    use std::env;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, bail, Context};
    use spatial_sink::backend::sim::SimulatedBackend;
    use spatial_sink::{
        AudioBlock, AudioFormat, ChannelMask, OutputConfig, OutputEvent, SpatialOutput,
        SpeakerPosition,
    };
    use tracing::info;
    use tracing_subscriber::EnvFilter;

    const SAMPLE_RATE: u32 = 48_000;
    const BLOCK_FRAMES: usize = 480;
    const TICK: Duration = Duration::from_millis(10);
    const BASE_TONE_HZ: f32 = 220.0;
    const TONE_AMPLITUDE: f32 = 0.25;

    struct Options {
        layout: ChannelMask,
        seconds: f32,
        config: Option<PathBuf>,
        wav: Option<PathBuf>,
    }

    fn usage() {
        eprintln!(
            "Usage:\n  spatial-sink [--layout <name>] [--seconds <n>] [--config <file.json>] [--wav <out.wav>]\n\nFlags:\n  --layout <name>   Channel layout: mono, stereo, 5.1, 7.1 (default 5.1)\n  --seconds <n>     Tone duration in seconds (default 2)\n  --config <file>   Output configuration (JSON)\n  --wav <file>      Write the rendered speaker objects as a multichannel WAV\n  -h, --help        Show this help\n\nSet RUST_LOG=spatial_sink=debug for worker logs."
        );
    }

    fn parse_args() -> anyhow::Result<Option<Options>> {
        let mut options = Options {
            layout: ChannelMask::SURROUND_5_1,
            seconds: 2.0,
            config: None,
            wav: None,
        };

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    usage();
                    return Ok(None);
                }
                "--layout" => {
                    let value = args.next().ok_or_else(|| anyhow!("--layout requires a value"))?;
                    options.layout = ChannelMask::from_layout_name(&value)
                        .ok_or_else(|| anyhow!("unknown layout: {value}"))?;
                }
                "--seconds" => {
                    let value = args.next().ok_or_else(|| anyhow!("--seconds requires a value"))?;
                    options.seconds = value
                        .parse()
                        .with_context(|| format!("invalid duration: {value}"))?;
                }
                "--config" => {
                    let value = args.next().ok_or_else(|| anyhow!("--config requires a path"))?;
                    options.config = Some(PathBuf::from(value));
                }
                "--wav" => {
                    let value = args.next().ok_or_else(|| anyhow!("--wav requires a path"))?;
                    options.wav = Some(PathBuf::from(value));
                }
                _ => {
                    usage();
                    bail!("unknown flag: {arg}");
                }
            }
        }

        if !(options.seconds > 0.0) {
            bail!("duration must be positive");
        }
        Ok(Some(options))
    }

    /// One sine per channel, an octave step apart, interleaved in pipeline order
    fn tone_block(
        start_frame: usize,
        frames: usize,
        channels: usize,
    ) -> anyhow::Result<AudioBlock> {
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in start_frame..start_frame + frames {
            let t = frame as f32 / SAMPLE_RATE as f32;
            for channel in 0..channels {
                let freq = BASE_TONE_HZ * (1.0 + channel as f32 * 0.5);
                samples.push((t * freq * std::f32::consts::TAU).sin() * TONE_AMPLITUDE);
            }
        }
        Ok(AudioBlock::from_interleaved(samples, channels)?)
    }

    fn write_wav(
        path: &Path,
        backend: &SimulatedBackend,
        positions: &[SpeakerPosition],
    ) -> anyhow::Result<()> {
        let captures: Vec<Vec<f32>> = positions.iter().map(|p| backend.captured(*p)).collect();
        let frames = captures.iter().map(Vec::len).min().unwrap_or(0);

        let spec = hound::WavSpec {
            channels: positions.len() as u16,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("failed to create {}", path.display()))?;

        for frame in 0..frames {
            for capture in &captures {
                let sample = (capture[frame].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;

        println!("Wrote {} frames x {} objects to {}", frames, positions.len(), path.display());
        Ok(())
    }

    pub fn run() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();

        let Some(options) = parse_args()? else {
            return Ok(());
        };

        println!("Spatial Sink - Simulated Object Rendering");
        println!("==========================================\n");

        let backend = SimulatedBackend::new();
        let shared: Arc<SimulatedBackend> = Arc::new(backend.clone());
        let mut output = match &options.config {
            Some(path) => SpatialOutput::open_with_config_file(shared, path)?,
            None => SpatialOutput::open(shared, OutputConfig::default())?,
        };

        for event in output.events().try_iter() {
            if let OutputEvent::DeviceAdded(device) = event {
                println!("Device: {} ({})", device.name, device.id);
            }
        }

        let format = output.start(AudioFormat::float(SAMPLE_RATE, options.layout))?;
        let channels = format.channel_count();
        let positions = output.positions();
        let labels: Vec<&str> = positions.iter().map(|p| p.label()).collect();
        println!("Objects: {}", labels.join(" "));
        let muted = if output.is_muted() { " (muted)" } else { "" };
        println!("Volume:  {:.2}{}\n", output.volume(), muted);

        // the simulated device asks for a quota every tick
        let running = Arc::new(AtomicBool::new(true));
        let ticker = {
            let running = Arc::clone(&running);
            let backend = backend.clone();
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    backend.tick();
                    thread::sleep(TICK);
                }
            })
        };

        let total_frames = (options.seconds * SAMPLE_RATE as f32) as usize;
        let started = Instant::now();
        let mut produced = 0;
        while produced < total_frames {
            let frames = BLOCK_FRAMES.min(total_frames - produced);
            output.play(tone_block(produced, frames, channels)?)?;
            produced += frames;

            // stay about 50 ms ahead of the device
            while output.time_get()? > 50_000 {
                thread::sleep(Duration::from_millis(2));
            }
        }

        output.flush(true)?;
        let delay = output.time_get()?;
        output.stop()?;

        running.store(false, Ordering::Relaxed);
        ticker
            .join()
            .map_err(|_| anyhow!("ticker thread panicked"))?;

        let stats = output.stats();
        info!(cycles = stats.cycles, underruns = stats.underruns, "demo finished");

        println!("=== Render Statistics ===");
        println!("Duration:          {:.2} seconds", started.elapsed().as_secs_f32());
        println!("Render cycles:     {}", stats.cycles);
        println!("Frames delivered:  {}", stats.frames_delivered);
        println!("Underruns:         {}", stats.underruns);
        println!("Skipped buffers:   {}", stats.skipped_buffers);
        println!("Final delay:       {:.1} ms", delay as f32 / 1000.0);

        if let Some(path) = &options.wav {
            write_wav(path, &backend, &positions)?;
        }

        println!("\nPlayback complete!");
        Ok(())
    }
}

#[cfg(feature = "sim")]
fn main() -> anyhow::Result<()> {
    cli::run()
}
