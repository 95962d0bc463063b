use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use hp_core::DependencyMode;

pub const HP_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nCommands:\n{subcommands}\n\nGlobal options:\n{options}\n";

pub const HP_BEFORE_HELP: &str = concat!(
    "hp ",
    env!("CARGO_PKG_VERSION"),
    " – reproducible image builds for the hpath-sim server\n\n",
    "\x1b[1;36mRecipe\x1b[0m\n",
    "  init             Write a default hp.toml.\n",
    "  check            Validate hp.toml, the lock, and the payload directory.\n",
    "  render           Print the equivalent Dockerfile.\n\n",
    "\x1b[1;36mDependencies\x1b[0m\n",
    "  compile          Resolve requirements.in into a pinned requirements.txt.\n",
    "  sync             Reconcile a site-packages directory with the lock.\n",
    "  install          Pinned-install the committed lock into a directory.\n\n",
    "\x1b[1;36mImage\x1b[0m\n",
    "  build            Base, dependencies, payload, workdir, entrypoint -> OCI layout.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "hp",
    author,
    version,
    disable_help_subcommand = true,
    before_help = HP_BEFORE_HELP,
    help_template = HP_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct HpCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still set the exit code)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        help = "Never touch the network for this invocation (sets HP_ONLINE=0)",
        conflicts_with = "online",
        global = true
    )]
    pub offline: bool,
    #[arg(
        long,
        help = "Allow network access even if HP_ONLINE=0",
        conflicts_with = "offline",
        global = true
    )]
    pub online: bool,
    #[arg(
        short = 'C',
        long,
        value_name = "PATH",
        help = "Build recipe to use (default: ./hp.toml)",
        global = true
    )]
    pub recipe: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(
        about = "Write a default hp.toml for the selected dependency mode.",
        override_usage = "hp init [--mode compile|pinned] [--force]"
    )]
    Init(InitArgs),
    #[command(
        about = "Resolve the loose manifest into the lock manifest.",
        override_usage = "hp compile [--dry-run] [--generate-hashes]"
    )]
    Compile(CompileArgs),
    #[command(
        about = "Reconcile a site-packages directory with the lock (compiles first in compile mode).",
        override_usage = "hp sync --target <DIR> [--dry-run]"
    )]
    Sync(TargetArgs),
    #[command(
        about = "Install exactly what the committed lock pins into a directory.",
        override_usage = "hp install --target <DIR> [--dry-run]"
    )]
    Install(TargetArgs),
    #[command(about = "Validate the recipe, the lock, and the payload directory (read-only).")]
    Check,
    #[command(
        about = "Render the Dockerfile equivalent of the recipe.",
        override_usage = "hp render [--mode compile|pinned] [--out FILE]"
    )]
    Render(RenderArgs),
    #[command(
        about = "Run the build pipeline and write an OCI image layout.",
        override_usage = "hp build [--out PATH] [--tag NAME:TAG]"
    )]
    Build(BuildArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModeArg {
    Compile,
    Pinned,
}

impl From<ModeArg> for DependencyMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Compile => DependencyMode::Compile,
            ModeArg::Pinned => DependencyMode::Pinned,
        }
    }
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long, value_enum, help = "Dependency mode to record (default: compile)")]
    pub mode: Option<ModeArg>,
    #[arg(long, help = "Overwrite an existing hp.toml")]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    #[arg(long, help = "Resolve and report without writing the lock")]
    pub dry_run: bool,
    #[arg(long, help = "Emit --hash options for every pin")]
    pub generate_hashes: bool,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    #[arg(long, value_name = "DIR", help = "site-packages directory to reconcile")]
    pub target: PathBuf,
    #[arg(long, help = "Plan without installing or removing anything")]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[arg(long, value_enum, help = "Render for this mode instead of the recipe's")]
    pub mode: Option<ModeArg>,
    #[arg(long, value_name = "FILE", help = "Write the Dockerfile here instead of stdout")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Output directory, or a .tar file (default: dist/oci/<name>-<tag>)"
    )]
    pub out: Option<PathBuf>,
    #[arg(long, value_name = "NAME:TAG", help = "Override the image name and tag")]
    pub tag: Option<String>,
}
