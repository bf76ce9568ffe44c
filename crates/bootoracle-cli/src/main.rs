//! Bootloader oracle CLI entrypoint.
//!
//! Runs conformance and fault-injection scenarios against a bootloader on a
//! serial port:
//! - `bootoracle scenario <name>` - one scenario
//! - `bootoracle sequence <name>` - a fail-fast sequence of scenarios
//! - `bootoracle run <name>` - whichever of the two `name` refers to
//! - `bootoracle list` - catalog contents
//!
//! Exit status is 0 when the run passed, 1 when it failed and 2 when it
//! could not be run at all or was interrupted with Ctrl-C.

#![forbid(unsafe_code)]

mod report;
mod serial;

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Context, bail};
use bootoracle_core::{
    CancelToken, ClientConfig, Environment, ExternallyManaged, Orchestrator, OrchestratorConfig,
    ProtocolClient, RunReport, ScenarioCatalog, SystemEnv, Transport,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{report::ResultFile, serial::SerialTransport};

/// Catalog used when `--catalog` is not given
const DEFAULT_CATALOG: &str = include_str!("../catalog/default.json");

/// Serial bootloader conformance and fault-injection oracle.
#[derive(Parser)]
#[command(name = "bootoracle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial device the bootloader is attached to.
    #[arg(long, env = "BOOTORACLE_DEVICE", default_value = "/dev/ttyUSB0")]
    device: String,

    /// Baud rate.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Scenario catalog (JSON). Defaults to the built-in catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Write the run result as JSON to this file.
    #[arg(long)]
    json_output: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seconds to wait after opening the port, for boards that reset on open.
    #[arg(long, default_value_t = 0.0)]
    startup_delay: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scenario.
    Scenario {
        /// Scenario name
        name: String,
    },

    /// Run a sequence of scenarios, stopping at the first failure.
    Sequence {
        /// Sequence name
        name: String,
    },

    /// Run a scenario or sequence by name.
    Run {
        /// Scenario or sequence name
        name: String,
    },

    /// List the scenarios and sequences in the catalog.
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("error: {err:#}");
        return ExitCode::from(2);
    }

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "run aborted");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        },
    }
}

/// Logs go to stderr (or `log_file`) so stdout stays clean for results.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log_file {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        },
        None => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
        },
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let catalog = load_catalog(cli.catalog.as_deref())?;

    let name = match &cli.command {
        Command::List => {
            print_catalog(&catalog);
            return Ok(true);
        },
        Command::Scenario { name } => {
            if catalog.scenario(name).is_none() {
                bail!("no scenario named '{name}' in the catalog");
            }
            name
        },
        Command::Sequence { name } => {
            if catalog.sequence(name).is_none() {
                bail!("no sequence named '{name}' in the catalog");
            }
            name
        },
        Command::Run { name } => {
            if catalog.scenario(name).is_none() && catalog.sequence(name).is_none() {
                bail!("no scenario or sequence named '{name}' in the catalog");
            }
            name
        },
    };
    let startup_delay = Duration::try_from_secs_f64(cli.startup_delay)
        .context("--startup-delay must be a non-negative number of seconds")?;

    let cancel = CancelToken::new();
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || cancel.cancel()
    })
    .context("installing Ctrl-C handler")?;

    let started = Instant::now();
    let transport = SerialTransport::open(&cli.device, cli.baud)
        .with_context(|| format!("opening {} at {} baud", cli.device, cli.baud))?;
    let env = SystemEnv::with_cancel(cancel.clone());
    if !startup_delay.is_zero() {
        tracing::info!(?startup_delay, "waiting for target startup");
        env.sleep(startup_delay).context("startup delay interrupted")?;
    }

    let client = ProtocolClient::new(transport, env, ClientConfig::default());
    let report = execute(client, catalog, &cli.command, name)?;

    print_report(&report);
    if let Some(path) = &cli.json_output {
        ResultFile::new(&cli.device, started.elapsed(), &report).write_atomically(path)?;
    }
    verdict(&report, &cancel)
}

/// Runs `name` as the subcommand asks and hands back the report.
fn execute<T: Transport>(
    client: ProtocolClient<T, SystemEnv>,
    catalog: ScenarioCatalog,
    command: &Command,
    name: &str,
) -> anyhow::Result<RunReport> {
    let mut orchestrator =
        Orchestrator::new(client, ExternallyManaged, catalog, OrchestratorConfig::default());
    match command {
        Command::Scenario { .. } => orchestrator.run_scenario(name).map(RunReport::Scenario),
        Command::Sequence { .. } => orchestrator.run_sequence(name).map(RunReport::Sequence),
        _ => orchestrator.run(name),
    }
    .with_context(|| format!("running '{name}'"))
}

/// A cancelled run is an error even when what did run passed.
fn verdict(report: &RunReport, cancel: &CancelToken) -> anyhow::Result<bool> {
    if cancel.is_cancelled() {
        bail!("'{}' interrupted; results are partial", report.name());
    }
    Ok(report.success())
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<ScenarioCatalog> {
    let text = match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?,
        None => DEFAULT_CATALOG.to_string(),
    };
    let catalog = ScenarioCatalog::from_json(&text).context("loading scenario catalog")?;
    tracing::debug!(
        scenarios = catalog.scenarios.len(),
        sequences = catalog.sequences.len(),
        "catalog loaded"
    );
    Ok(catalog)
}

fn print_catalog(catalog: &ScenarioCatalog) {
    println!("Scenarios:");
    for (name, scenario) in &catalog.scenarios {
        println!("  {name}: {}", describe(&scenario.description));
    }
    println!("Sequences:");
    for (name, sequence) in &catalog.sequences {
        println!(
            "  {name}: {} ({} steps)",
            describe(&sequence.description),
            sequence.sequence.len()
        );
    }
}

fn describe(description: &str) -> &str {
    if description.is_empty() { "no description" } else { description }
}

fn print_report(report: &RunReport) {
    let status = if report.success() { "PASSED" } else { "FAILED" };
    println!("{} '{}' {status}: {}", report.kind(), report.name(), report.message());
    match report {
        RunReport::Scenario(result) => {
            println!("execution time: {:.3}s", result.execution_time.as_secs_f64());
        },
        RunReport::Sequence(result) => {
            println!("total execution time: {:.3}s", result.execution_time.as_secs_f64());
            for scenario in &result.scenario_results {
                let status = if scenario.success { "PASS" } else { "FAIL" };
                println!("  - {}: {status}", scenario.name);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use bootoracle_core::TransportError;

    use super::*;

    #[test]
    fn default_catalog_is_consistent() {
        let catalog = load_catalog(None).unwrap();

        assert!(catalog.scenario("normal").is_some());
        for (name, sequence) in &catalog.sequences {
            for step in &sequence.sequence {
                assert!(
                    catalog.scenario(step.scenario()).is_some(),
                    "sequence '{name}' names unknown scenario '{}'",
                    step.scenario()
                );
            }
        }
    }

    /// Never answers; writes vanish.
    struct Silent;

    impl Transport for Silent {
        fn read(&mut self, _buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
            Err(TransportError::Timeout(timeout))
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            Ok(data.len())
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn silent_client(cancel: &CancelToken) -> ProtocolClient<Silent, SystemEnv> {
        ProtocolClient::new(
            Silent,
            SystemEnv::with_cancel(cancel.clone()),
            ClientConfig::default(),
        )
    }

    #[test]
    fn cancelled_run_is_an_error() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let command = Command::Scenario { name: "normal".into() };

        let catalog = load_catalog(None).unwrap();

        let outcome = execute(silent_client(&cancel), catalog, &command, "normal")
            .and_then(|report| verdict(&report, &cancel));

        let err = outcome.unwrap_err();
        assert!(format!("{err:#}").contains("interrupted"), "{err:#}");
    }

    #[test]
    fn uncancelled_verdict_follows_the_report() {
        let cancel = CancelToken::new();
        let command = Command::Scenario { name: "normal".into() };
        let catalog = load_catalog(None).unwrap();

        let report = execute(silent_client(&cancel), catalog, &command, "normal").unwrap();

        assert!(!report.success());
        assert!(!verdict(&report, &cancel).unwrap());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
