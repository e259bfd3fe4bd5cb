use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use probe::{TcpProber, ThroughputProbe};
use rank::RankConfig;
use scan::Scanner;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod input;
mod logging;
mod report;
mod settings;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat { Text, Json, Jsonl }

#[derive(Debug, Parser)]
#[command(name = "sweep", version, about = "Extract, probe and rank proxy descriptors")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./sweep.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Files to read descriptors from; `-` reads stdin
    inputs: Vec<PathBuf>,
    /// Folder whose sub*.txt files are read
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,
    /// Descriptor text passed inline
    #[arg(long)]
    text: Option<String>,
}

impl InputArgs {
    fn tokens(&self) -> Result<Vec<String>> {
        let blobs = input::gather(&self.inputs, self.dir.as_deref(), self.text.as_deref())?;
        Ok(link_extract::extract_many(&blobs))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Print the unique descriptors found in the input
    Extract {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Decode each descriptor and print its endpoint or the decode error
    Parse {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Jsonl)]
        format: OutputFormat,
    },
    /// Probe every descriptor and write ranked results
    Scan {
        #[command(flatten)]
        input: InputArgs,
        /// Connect timeout per probe in milliseconds [default: 4000]
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Max probes in flight [default: 100]
        #[arg(long)]
        concurrency: Option<usize>,
        /// Inclusive latency ceiling in milliseconds [default: 800]
        #[arg(long)]
        max_latency_ms: Option<u64>,
        /// Also measure download throughput and rank by it
        #[arg(long, default_value_t = false)]
        speed: bool,
        /// Throughput floor in Mbps when --speed is set [default: 1.0]
        #[arg(long)]
        min_mbps: Option<f64>,
        /// Retries per probe after a timeout or connect error
        #[arg(long)]
        retries: Option<u32>,
        /// Base delay between retries in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,
        /// Probe launches per second; 0 disables pacing
        #[arg(long)]
        qps: Option<u32>,
        /// Stop dispatching after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Write band files into this folder instead of printing them
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Also write ranked results as CSV
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match cli.command {
        Commands::Version => {
            println!("sweep {} (core {})", env!("CARGO_PKG_VERSION"), sweep_core::version());
        }
        Commands::Extract { input, format } => {
            let tokens = input.tokens()?;
            let mut out = io::stdout().lock();
            match format {
                OutputFormat::Text => {
                    for t in &tokens {
                        writeln!(out, "{t}")?;
                    }
                }
                OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&tokens)?)?,
                OutputFormat::Jsonl => {
                    for t in &tokens {
                        writeln!(out, "{}", serde_json::json!({ "token": t }))?;
                    }
                }
            }
            info!(count = tokens.len(), "descriptors extracted");
        }
        Commands::Parse { input, format } => {
            let tokens = input.tokens()?;
            let mut out = io::stdout().lock();
            let mut records = Vec::new();
            for token in &tokens {
                let parsed = descriptor::parse(token);
                if format == OutputFormat::Text {
                    match &parsed {
                        Ok(ep) => writeln!(out, "{} {}:{} {}", ep.family(), ep.host(), ep.port(), ep.label())?,
                        Err(e) => writeln!(out, "error: {e}: {token}")?,
                    }
                    continue;
                }
                let obj = match parsed {
                    Ok(ep) => serde_json::json!({
                        "token": token,
                        "family": ep.family(),
                        "host": ep.host(),
                        "port": ep.port(),
                        "label": ep.label(),
                    }),
                    Err(e) => serde_json::json!({ "token": token, "error": e.to_string() }),
                };
                if format == OutputFormat::Jsonl {
                    writeln!(out, "{}", serde_json::to_string(&obj)?)?;
                } else {
                    records.push(obj);
                }
            }
            if format == OutputFormat::Json {
                writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
            }
        }
        Commands::Scan {
            input,
            timeout_ms,
            concurrency,
            max_latency_ms,
            speed,
            min_mbps,
            retries,
            retry_delay_ms,
            qps,
            deadline_secs,
            out,
            csv,
            format,
        } => {
            let loaded_cfg = config::load_config(cli.config.as_deref())?;
            let flags = settings::ScanFlags {
                timeout_ms,
                concurrency,
                max_latency_ms,
                speed,
                min_mbps,
                retries,
                retry_delay_ms,
                qps,
                deadline_secs,
                format,
                out,
            };
            let s = settings::resolve(&flags, loaded_cfg.as_ref().and_then(|c| c.scan.as_ref()))?;
            let tokens = input.tokens()?;

            let rt = tokio::runtime::Runtime::new()?;
            let run = rt.block_on(async {
                let mut prober = TcpProber::new(s.probe.clone());
                if let Some(opts) = s.throughput.clone() {
                    prober = prober.with_throughput(ThroughputProbe::new(opts)?);
                }
                let scanner = Scanner::new(Arc::new(prober));
                let handle = scanner.start_scan(tokens, s.scan.clone(), Arc::new(report::LogSink::new(25)))?;
                let canceller = handle.canceller();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupted; waiting for in-flight probes");
                        canceller.cancel();
                    }
                });
                anyhow::Ok(handle.await_completion().await?)
            })?;

            let ranking = rank::rank_run(&run, &RankConfig::default());
            if let Some(dir) = &s.out {
                for path in rank::write_ranking(dir, &ranking)? {
                    info!(path = %path.display(), "saved");
                }
                if s.format != OutputFormat::Text {
                    report::print_ranking(&mut io::stdout().lock(), &run, &ranking, s.format)?;
                }
            } else {
                report::print_ranking(&mut io::stdout().lock(), &run, &ranking, s.format)?;
            }
            if let Some(path) = &csv {
                report::write_csv(path, &ranking)?;
            }
            info!("{}", report::summary_line(&run, &ranking));
        }
    }
    Ok(())
}
