use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framebuf::cli::Args;
use framebuf::config::BufferConfig;
use framebuf::paths::{self, PathConfig, CONFIG_FILE};
use framebuf::player::{Player, TickOutcome};
use framebuf::synthetic::SyntheticSource;
use framebuf::{AnimationState, BufferEvent, BufferingController, ChannelListener};

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::config_file("framebuf.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), level);
    } else {
        // Respects RUST_LOG if set
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn load_config(args: &Args, path_config: &PathConfig) -> Result<BufferConfig> {
    let path = paths::config_file(CONFIG_FILE, path_config);
    let mut config = BufferConfig::load(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;
    info!("Config: {}", path.display());

    if let Some(buffer) = args.buffer {
        config.max_buffer_count = buffer;
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    if let Some(policy) = args.policy {
        config.under_run_policy = policy.into();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: {:#}", e);
    }
    init_logging(&args, &path_config)?;
    debug!("Command-line args: {:?}", args);

    let config = load_config(&args, &path_config)?;
    debug!("Effective config: {:?}", config);

    let source = Arc::new(
        SyntheticSource::new(args.frames, Duration::from_millis(args.delay_ms))
            .with_decode_time(Duration::from_millis(args.decode_ms))
            .with_frame_bytes(args.frame_kb * 1024),
    );
    let (listener, events) = ChannelListener::new();
    let controller = Arc::new(BufferingController::with_workers(
        Arc::clone(&source),
        Arc::new(listener),
        &config,
    ));
    let mut player = Player::new(Arc::clone(&controller), config.under_run_policy);

    player.play(args.start)?;
    let target = (args.frames * args.loops) as u64;
    let started = Instant::now();
    let mut under_runs = 0u64;
    let mut warned = false;

    while player.frames_shown() < target {
        match player.tick() {
            TickOutcome::Frame { index, frame } => {
                debug!("Frame {} ({} bytes)", index, frame.len());
            }
            TickOutcome::UnderRun { .. } | TickOutcome::Skipped { .. } => under_runs += 1,
            TickOutcome::Idle => {}
        }

        if let Some(at) = args.memory_warning_at {
            if !warned && player.frames_shown() >= at {
                warn!("Simulating memory warning after {} frames", at);
                controller.did_receive_memory_warning();
                warned = true;
            }
        }

        for event in events.try_iter() {
            match event {
                BufferEvent::StateChanged(AnimationState::Running) => info!("Animation running"),
                BufferEvent::StateChanged(AnimationState::Stopped) => info!("Animation stopped"),
                BufferEvent::Progress(percent) => debug!("Buffered {:.0}%", percent * 100.0),
            }
        }

        let wait = player
            .next_tick_in(Instant::now())
            .unwrap_or(Duration::from_millis(1));
        std::thread::sleep(wait.max(Duration::from_micros(500)));
    }

    let elapsed = started.elapsed();
    player.stop();

    let stats = controller.stats();
    info!(
        "Played {} frames in {:.2}s, {} under-run ticks, hit rate {:.1}%",
        player.frames_shown(),
        elapsed.as_secs_f64(),
        under_runs,
        stats.hit_rate() * 100.0
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
