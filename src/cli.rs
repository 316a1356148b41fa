use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "at-gateway",
    about = "Request/response gateway for AT-style serial devices"
)]
pub struct Cli {
    /// Verbose logging (same as RUST_LOG=at_gateway=debug)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Open the device and serve JSON command requests over TCP
    Serve(ServeOpts),
    /// Run a single catalog command and print the result
    Exec(ExecOpts),
    /// List the registered commands
    Catalog(CatalogOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 19_200)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Address to accept requests on
    #[arg(long, default_value = "0.0.0.0:4444")]
    pub listen: String,
    /// YAML file with extra or overriding command definitions
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// "busy" or milliseconds to sleep between empty receive-buffer polls
    #[arg(long, default_value = "busy")]
    pub send_poll: String,
    /// Listen completion poll interval in milliseconds
    #[arg(long, default_value_t = 25)]
    pub listen_poll: u64,
    /// Stats log interval in seconds (0 disables)
    #[arg(long, default_value_t = 60.0)]
    pub stats: f64,
}

#[derive(Args, Debug, Clone)]
pub struct ExecOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// YAML file with extra or overriding command definitions
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// "busy" or milliseconds to sleep between empty receive-buffer polls
    #[arg(long, default_value = "busy")]
    pub send_poll: String,
    /// Catalog key, e.g. ZB_ATI
    pub command: String,
    /// Command parameters, joined with the command's parameter separator
    pub params: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CatalogOpts {
    /// YAML file with extra or overriding command definitions
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

/// What a waiting loop does when there is nothing to look at yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Yield and retry immediately.
    #[default]
    Busy,
    Sleep(Duration),
}

impl PollMode {
    pub fn from_cli(poll: &str) -> anyhow::Result<Self> {
        if poll.eq_ignore_ascii_case("busy") {
            Ok(PollMode::Busy)
        } else {
            let ms: u64 = poll
                .parse()
                .map_err(|_| anyhow!("poll must be integer ms or 'busy'"))?;
            if ms == 0 {
                Ok(PollMode::Busy)
            } else {
                Ok(PollMode::Sleep(Duration::from_millis(ms)))
            }
        }
    }

    pub fn idle(self) {
        match self {
            PollMode::Busy => std::thread::yield_now(),
            PollMode::Sleep(d) => std::thread::sleep(d),
        }
    }
}
