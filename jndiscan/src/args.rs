use crate::report::OutputFormat;
use clap::{ArgAction, Args, Parser, Subcommand};
use jndiscan_core::{CatcherKind, RequestType};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "jndiscan", version, about = "Out-of-band Log4Shell (CVE-2021-44228) scanner")]
pub struct Cli {
    /// Optional config file (YAML). If omitted, loads ./jndiscan.yaml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Report every attempt and log sub-probes (-vv for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[arg(long, global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print version information
    Version,
    /// Send crafted requests and catch the callbacks of vulnerable systems
    Remote {
        #[command(subcommand)]
        cmd: RemoteCmd,
    },
}

#[derive(Debug, Subcommand)]
pub enum RemoteCmd {
    /// Scan a single URL
    Url {
        url: String,
        #[command(flatten)]
        args: RemoteArgs,
    },
    /// Scan every host of a CIDR range
    Cidr {
        cidr: String,
        /// Schemes to try per host (default: http and https)
        #[arg(long = "schema", value_parser = ["http", "https"])]
        schemas: Vec<String>,
        /// Port to use instead of the scheme default
        #[arg(long)]
        port: Option<u16>,
        #[command(flatten)]
        args: RemoteArgs,
    },
}

/// Flags shared by every remote scan. Options left unset fall back to the config file,
/// then to built-in defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct RemoteArgs {
    /// Request type: get, post or json (repeatable)
    #[arg(short = 't', long = "type")]
    pub request_types: Vec<RequestType>,
    /// Header to fuzz (repeatable; default: a built-in list)
    #[arg(long = "header")]
    pub headers: Vec<String>,
    #[arg(long, value_name = "FILE")]
    pub headers_file: Option<PathBuf>,
    /// Body field to fuzz for post/json requests (repeatable)
    #[arg(long = "field")]
    pub fields: Vec<String>,
    #[arg(long, value_name = "FILE")]
    pub fields_file: Option<PathBuf>,
    /// Query param to fuzz for get requests (repeatable)
    #[arg(long = "param")]
    pub params: Vec<String>,
    #[arg(long, value_name = "FILE")]
    pub params_file: Option<PathBuf>,
    /// Payload template replacing the canonical one (repeatable)
    #[arg(long = "payload")]
    pub payloads: Vec<String>,
    #[arg(long, value_name = "FILE")]
    pub payloads_file: Option<PathBuf>,
    /// Fixed header value, key=value; {{payload}} is replaced with the payload
    #[arg(long, value_name = "KEY=VALUE")]
    pub set_header: Vec<String>,
    #[arg(long, value_name = "KEY=VALUE")]
    pub set_field: Vec<String>,
    #[arg(long, value_name = "KEY=VALUE")]
    pub set_param: Vec<String>,
    /// Callback catcher: dns, ldap, tcp or none [default: dns]
    #[arg(long)]
    pub catcher_type: Option<CatcherKind>,
    /// Address placed in payloads for targets to call back to (ip[:port])
    #[arg(long)]
    pub caddr: Option<String>,
    /// Address the catcher binds when it differs from --caddr
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Resource in payload [default: l4s]
    #[arg(short = 'r', long)]
    pub resource: Option<String>,
    #[arg(long)]
    pub proxy: Option<String>,
    /// Basic auth credentials (user:pass)
    #[arg(long, value_name = "USER:PASS")]
    pub basic_auth: Option<String>,
    #[arg(long)]
    pub no_redirect: bool,
    /// Exclude the User-Agent header from fuzzing
    #[arg(long)]
    pub no_user_agent_fuzzing: bool,
    /// Retry auth challenges with the payload as credentials
    #[arg(long)]
    pub auth_fuzzing: bool,
    /// Submit HTML forms found in responses with the payload
    #[arg(long)]
    pub form_fuzzing: bool,
    /// Extend scans with obfuscated payloads
    #[arg(long)]
    pub waf_bypass: bool,
    /// Add one randomly chosen obfuscated payload instead of the full set
    #[arg(long, conflicts_with = "waf_bypass")]
    pub waf_bypass_random: bool,
    #[arg(long = "check-cve-2021-45046")]
    pub check_cve_2021_45046: bool,
    /// Shortcut to run all checks with all request types
    #[arg(short = 'a', long)]
    pub all: bool,
    /// Max concurrent requests [default: 150]
    #[arg(long)]
    pub max_threads: Option<usize>,
    /// Max concurrent form submissions [default: 10]
    #[arg(long)]
    pub max_form_submits: Option<usize>,
    /// Per-request time limit, e.g. 3s or 500ms [default: 3s]
    #[arg(long)]
    pub timeout: Option<String>,
    /// How long each attempt waits for its callback [default: 5s]
    #[arg(short = 'w', long)]
    pub wait: Option<String>,
    /// Wait for callbacks until interrupted
    #[arg(long)]
    pub no_wait_timeout: bool,
    /// Cancel the whole scan after this long
    #[arg(long)]
    pub max_scan_time: Option<String>,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    /// Output file (overwrites)
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    /// Write CSV to --out instead of text/json
    #[arg(long)]
    pub csv: bool,
}

impl RemoteArgs {
    /// Expand `--all` into the checks and request types it stands for.
    pub fn apply_all(&mut self) {
        if self.all {
            self.auth_fuzzing = true;
            self.form_fuzzing = true;
            self.waf_bypass = true;
            self.check_cve_2021_45046 = true;
            self.request_types = RequestType::ALL.to_vec();
        }
    }
}
