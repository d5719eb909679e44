use std::process::ExitCode;

use clap::Parser;
use plugloader::{Loader, LoaderConfig};

/// Loads a plugin list, resolving feature dependencies, and reports the
/// resulting status.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Whitespace-separated plugin names, optionally `!`-suffixed to mark
    /// critical, e.g. "random nonce pem pkcs1! x509 gmp!".
    #[arg(long)]
    list: String,

    /// Base directory; `<dir>/<plugin-with-dashes-to-underscores>/.libs`
    /// is added to the search path for every name in `--list`.
    #[arg(long, value_name = "BASE")]
    plugindir: Option<String>,

    /// Additional search-path directory, searched in the order given.
    /// May be repeated.
    #[arg(long = "search-path", value_name = "DIR")]
    search_paths: Vec<String>,

    /// Retain dynamic library handles after unload instead of dropping
    /// them, so symbolic debug info survives for stack traces.
    #[arg(long)]
    leak_detective: bool,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let mut config = LoaderConfig {
        leak_detective: cli.leak_detective,
        ..Default::default()
    };
    for path in &cli.search_paths {
        config.search_paths.add_directory(path);
    }

    let mut loader = Loader::new(config);

    if let Some(base) = &cli.plugindir {
        loader.add_plugin_dirs(base, &cli.list);
    }

    let ok = loader.load(&cli.list);
    loader.status(log::Level::Info);

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
