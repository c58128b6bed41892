use clap::Parser;
use std::path::PathBuf;

use crate::config::UnderRunPolicy;

const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Target: ",
    std::env::consts::ARCH,
    "-",
    std::env::consts::OS
);

/// Animated frame buffering demo: plays a synthetic sequence through the
/// look-ahead buffer and reports buffering health.
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Number of frames in the synthetic sequence
    #[arg(short = 'n', long = "frames", value_name = "N", default_value_t = 48)]
    pub frames: usize,

    /// Start frame (0-based)
    #[arg(short = 's', long = "start", value_name = "N", default_value_t = 0)]
    pub start: usize,

    /// Look-ahead window in frames (overrides config)
    #[arg(short = 'b', long = "buffer", value_name = "N")]
    pub buffer: Option<usize>,

    /// Per-frame display time in milliseconds
    #[arg(short = 'd', long = "delay-ms", value_name = "MS", default_value_t = 40)]
    pub delay_ms: u64,

    /// Simulated decode time per frame in milliseconds
    #[arg(long = "decode-ms", value_name = "MS", default_value_t = 25)]
    pub decode_ms: u64,

    /// Synthetic frame size in KB
    #[arg(long = "frame-kb", value_name = "KB", default_value_t = 256)]
    pub frame_kb: usize,

    /// How many times to loop the sequence
    #[arg(short = 'o', long = "loops", value_name = "N", default_value_t = 2)]
    pub loops: usize,

    /// Fire a memory warning after this many shown frames
    #[arg(long = "memory-warning-at", value_name = "N")]
    pub memory_warning_at: Option<u64>,

    /// Under-run handling (overrides config)
    #[arg(long = "policy", value_enum)]
    pub policy: Option<PolicyArg>,

    /// Worker threads (overrides config)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Log to file instead of stderr (default: framebuf.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Wait,
    Skip,
}

impl From<PolicyArg> for UnderRunPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Wait => UnderRunPolicy::Wait,
            PolicyArg::Skip => UnderRunPolicy::Skip,
        }
    }
}
