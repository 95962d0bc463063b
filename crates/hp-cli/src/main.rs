use std::env;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use hp_core::{CommandContext, GlobalOptions, SystemEffects};

mod cli;
mod dispatch;
mod output;
mod style;

use cli::HpCli;
use output::{emit_output, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = HpCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);
    if cli.offline {
        env::set_var("HP_ONLINE", "0");
    } else if cli.online {
        env::set_var("HP_ONLINE", "1");
    }

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
        recipe: cli
            .recipe
            .as_ref()
            .map(|path| path.to_string_lossy().to_string()),
    };
    let ctx = CommandContext::new(&global, SystemEffects::shared())
        .map_err(|err| eyre!("{err:?}"))?;
    let (info, outcome) = dispatch::dispatch_command(&ctx, &cli.command)?;
    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = emit_output(&opts, info, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("hp_core={level},hp_domain={level},hp_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
