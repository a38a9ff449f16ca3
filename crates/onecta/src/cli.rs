//! Clap derive structures for the `onecta` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// onecta -- talk to Daikin Onecta cloud devices from the command line
#[derive(Debug, Parser)]
#[command(
    name = "onecta",
    version,
    about = "Inspect and control Daikin Onecta devices from the command line",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Profile to use
    #[arg(long, short = 'p', env = "ONECTA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "ONECTA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ONECTA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the portal authorization URL to open in a browser
    AuthUrl(AuthUrlArgs),

    /// Exchange a portal authorization code for tokens
    Exchange(ExchangeArgs),

    /// Log in with consumer-app email and password
    Login(LoginArgs),

    /// Revoke and forget stored tokens
    Logout,

    /// Show authentication and rate-limit status
    Status,

    /// List devices on the account
    #[command(alias = "ls")]
    Devices,

    /// Read a characteristic from a device
    Get(GetArgs),

    /// Write a characteristic on a device
    Set(SetArgs),

    /// Stream controller events until interrupted
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct AuthUrlArgs {
    /// Fixed `state` value (random when omitted)
    #[arg(long)]
    pub state: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExchangeArgs {
    /// Authorization code from the redirect
    pub code: String,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Account email (overrides the profile)
    #[arg(long, short = 'e')]
    pub email: Option<String>,
}

/// Address of one characteristic on a device.
#[derive(Debug, Args)]
pub struct Target {
    /// Device id
    pub device: String,

    /// Management point embedded id (e.g. climateControl)
    pub management_point: String,

    /// Characteristic name (e.g. onOffMode)
    pub characteristic: String,

    /// Slash-separated path inside the characteristic value
    #[arg(long)]
    pub path: Option<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: Target,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: Target,

    /// New value; parsed as JSON, otherwise sent as a string
    #[arg(long = "value", short = 'V', allow_hyphen_values = true)]
    pub value: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show events for this device
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Do not open the realtime channel
    #[arg(long)]
    pub no_realtime: bool,

    /// Also refetch all devices every N seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(10..))]
    pub poll: Option<u64>,
}
