use anyhow::{Context, Result};
use clap::Parser;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use at_gateway::cli::{self, CatalogOpts, ExecOpts, PollMode, ServeOpts};
use at_gateway::executor::DEFAULT_LISTEN_POLL;
use at_gateway::port::CloseGuard;
use at_gateway::proto::wire;
use at_gateway::server::RequestServer;
use at_gateway::stats::StatsReporter;
use at_gateway::{Catalog, CommandExecutor, ExecutorOptions, SerialTransport, Transport};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.debug);
    match args.cmd {
        cli::Cmd::Serve(opts) => serve(opts),
        cli::Cmd::Exec(opts) => exec(opts),
        cli::Cmd::Catalog(opts) => list(opts),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "at_gateway=debug" } else { "at_gateway=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Close the port exactly once on Ctrl-C / SIGTERM, then exit.
fn install_shutdown_hook(transport: Arc<SerialTransport>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("shutting down");
        transport.close();
        std::process::exit(0);
    })
    .context("installing shutdown handler")
}

fn serve(opts: ServeOpts) -> Result<()> {
    let catalog = Catalog::load(opts.catalog.as_deref()).context("loading command catalog")?;
    let options = ExecutorOptions {
        send_poll: PollMode::from_cli(&opts.send_poll)?,
        listen_poll: Duration::from_millis(opts.listen_poll.max(1)),
        ..ExecutorOptions::default()
    };
    let transport = SerialTransport::open(&opts.ser)
        .with_context(|| format!("opening serial interface {}", opts.ser.dev))?;
    let _close = CloseGuard::new(transport.clone());
    install_shutdown_hook(Arc::clone(&transport))?;

    let executor = Arc::new(CommandExecutor::start(transport.clone(), options)?);
    let server = RequestServer::new(Arc::clone(&executor), Arc::new(catalog));
    let listener =
        TcpListener::bind(&opts.listen).with_context(|| format!("binding {}", opts.listen))?;
    let acceptor = thread::Builder::new()
        .name("accept".into())
        .spawn(move || server.serve(listener))?;

    let stats = executor.stats_handle();
    let mut reporter = StatsReporter::new();
    while !acceptor.is_finished() {
        thread::sleep(Duration::from_secs(1));
        reporter.maybe_log(&stats, opts.stats);
    }
    match acceptor.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "request server stopped"),
        Err(_) => warn!("request server panicked"),
    }
    info!("{}", executor.stats());
    Ok(())
}

fn exec(opts: ExecOpts) -> Result<()> {
    let catalog = Catalog::load(opts.catalog.as_deref()).context("loading command catalog")?;
    let request = catalog.request(&opts.command, opts.params.clone())?;
    let options = ExecutorOptions {
        send_poll: PollMode::from_cli(&opts.send_poll)?,
        listen_poll: DEFAULT_LISTEN_POLL,
        ..ExecutorOptions::default()
    };
    let transport = SerialTransport::open(&opts.ser)
        .with_context(|| format!("opening serial interface {}", opts.ser.dev))?;
    let _close = CloseGuard::new(transport.clone());
    install_shutdown_hook(Arc::clone(&transport))?;

    let executor = CommandExecutor::start(transport.clone(), options)?;
    let result = executor
        .execute(request)
        .with_context(|| format!("executing {}", opts.command))?;
    println!("{}", wire::format_result(&result)?);
    Ok(())
}

fn list(opts: CatalogOpts) -> Result<()> {
    let catalog = Catalog::load(opts.catalog.as_deref()).context("loading command catalog")?;
    for (key, d) in catalog.iter() {
        println!(
            "{:<16} {:<12} {:?} timeout={}s expect={:?}",
            key,
            d.name(),
            d.kind(),
            d.timeout().as_secs(),
            d.expected_output()
        );
    }
    Ok(())
}
