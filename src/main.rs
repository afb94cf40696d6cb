use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use host_scan_rs::inspect;
use host_scan_rs::logging;
use host_scan_rs::ports::PortRange;
use host_scan_rs::scanner::{ScanConfig, Scanner, DEFAULT_CONCURRENCY, MAX_BANNER_BYTES};
use host_scan_rs::server;
use host_scan_rs::types::{ScanReport, ScanTarget};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// host-scan-rs: bounded TCP connect scan of one host with banner grabbing and process attribution.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "host-scan-rs",
    version,
    about = "Bounded TCP connect scan of one host with banner grabbing and process attribution.",
    long_about = None
)]
struct Cli {
    /// Host name or IP address to scan.
    #[arg(long, env = "HOST_SCAN_HOST", default_value = "localhost")]
    host: String,

    /// Inclusive port range (`start-end`) or a single port.
    #[arg(long, env = "HOST_SCAN_PORTS", default_value = "0-10000")]
    ports: String,

    /// Max concurrent TCP connect attempts.
    #[arg(long, env = "HOST_SCAN_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds (1-5000).
    #[arg(
        long = "connect-timeout-ms",
        env = "HOST_SCAN_CONNECT_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..=5000)
    )]
    connect_timeout_ms: u64,

    /// Banner read deadline in milliseconds (1-2000).
    #[arg(
        long = "banner-timeout-ms",
        env = "HOST_SCAN_BANNER_TIMEOUT_MS",
        default_value_t = 2000,
        value_parser = clap::value_parser!(u64).range(1..=2000)
    )]
    banner_timeout_ms: u64,

    /// Skip process attribution for open ports.
    #[arg(long = "no-identify", default_value_t = false)]
    no_identify: bool,

    /// List closed ports too.
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Print the report as JSON on stdout instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Write the report as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON scan API on this address instead of scanning once (e.g. 127.0.0.1:8080).
    #[arg(long = "serve-api", env = "HOST_SCAN_SERVE_API")]
    serve_api: Option<String>,

    /// Log filter directive (e.g. `info`, `host_scan_rs=debug`). Defaults to RUST_LOG.
    #[arg(long = "log-level", env = "HOST_SCAN_LOG")]
    log_level: Option<String>,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            concurrency: self.concurrency,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            banner_timeout: Duration::from_millis(self.banner_timeout_ms),
            max_banner_bytes: MAX_BANNER_BYTES,
            identify: !self.no_identify,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref())?;

    if let Some(bind) = cli.serve_api.as_deref() {
        eprintln!("Scan API at http://{bind}/api (Ctrl+C to stop)");
        tokio::select! {
            res = server::spawn_server(bind) => res?,
            _ = tokio::signal::ctrl_c() => {}
        }
        return Ok(());
    }

    let range: PortRange = cli.ports.parse().context("invalid --ports")?;
    let target = ScanTarget::new(cli.host.clone(), range).context("invalid --host")?;
    let config = cli.scan_config();

    let mut scanner = Scanner::new(config);
    if config.identify {
        scanner = scanner.with_inspector(inspect::default_inspector());
    }

    // Ctrl-C stops dispatching; in-flight probes finish or time out.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });

    eprintln!(
        "Scanning {} ports {} (concurrency {})...",
        target.host(),
        target.range(),
        config.effective_concurrency()
    );
    let report = scanner.scan_with_cancel(&target, cancel).await;
    if report.cancelled {
        warn!("scan cancelled before all ports were probed");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_table(&report, cli.all);
    }
    if let Some(path) = cli.output.as_deref() {
        write_report_json(path, &report)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        eprintln!("Wrote JSON report to {}", path.display());
    }
    Ok(())
}

fn print_report_table(report: &ScanReport, all: bool) {
    let rows: Vec<_> = report
        .entries
        .iter()
        .filter(|e| all || e.probe.open)
        .collect();

    let mut banner_w = "banner".len();
    let mut proc_w = "process".len();
    let cells: Vec<(String, String)> = rows
        .iter()
        .map(|e| {
            let mut banner = e
                .probe
                .banner
                .as_deref()
                .unwrap_or_default()
                .trim_end()
                .replace('\n', "\\n")
                .replace('\r', "\\r");
            if banner.len() > 60 {
                banner = banner.chars().take(60).collect();
            }
            let process = match (&e.process, &e.lookup_issue) {
                (Some(p), _) => format!(
                    "{} ({})",
                    p.pid,
                    p.process_name.as_deref().unwrap_or("?")
                ),
                (None, Some(issue)) => format!("<{issue}>"),
                (None, None) => String::new(),
            };
            banner_w = banner_w.max(banner.len());
            proc_w = proc_w.max(process.len());
            (banner, process)
        })
        .collect();
    let port_w = 5usize;
    let state_w = "closed".len();
    let lat_w = "latency_ms".len();

    println!(
        "\nHost {}: open ports: {} (scanned: {}{})",
        report.host,
        report.open_count,
        report.entries.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    println!(
        "{:>port_w$}  {:<state_w$}  {:>lat_w$}  {:<proc_w$}  {:<banner_w$}",
        "port", "state", "latency_ms", "process", "banner",
    );
    println!(
        "{:-<port_w$}  {:-<state_w$}  {:-<lat_w$}  {:-<proc_w$}  {:-<banner_w$}",
        "", "", "", "", "",
    );
    for (e, (banner, process)) in rows.iter().zip(cells) {
        let state = if e.probe.open { "open" } else { "closed" };
        let latency = e.probe.latency_ms.map(|l| l.to_string()).unwrap_or_default();
        println!(
            "{:>port_w$}  {:<state_w$}  {:>lat_w$}  {:<proc_w$}  {:<banner_w$}",
            e.probe.port, state, latency, process, banner,
        );
    }

    for e in report.open_entries() {
        if let Some(p) = &e.process {
            println!("\nProcess listening on port {}:", e.probe.port);
            println!("  PID     : {}", p.pid);
            if let Some(path) = &p.executable_path {
                println!("  Path    : {path}");
            }
            if let Some(cmd) = &p.command_line {
                println!("  Command : {cmd}");
            }
            if let Some(ppid) = p.parent_pid {
                println!("  PPid    : {ppid}");
            }
            if let Some(state) = &p.state {
                println!("  State   : {state}");
            }
            if let Some(threads) = p.thread_count {
                println!("  Threads : {threads}");
            }
        }
    }
}

fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
