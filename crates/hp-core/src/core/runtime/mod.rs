use std::fmt;

pub(crate) mod effects;
pub(crate) mod process;

pub const HP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandGroup {
    Init,
    Compile,
    Sync,
    Install,
    Check,
    Render,
    Build,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandGroup::Init => "init",
            CommandGroup::Compile => "compile",
            CommandGroup::Sync => "sync",
            CommandGroup::Install => "install",
            CommandGroup::Check => "check",
            CommandGroup::Render => "render",
            CommandGroup::Build => "build",
        };
        f.write_str(name)
    }
}
