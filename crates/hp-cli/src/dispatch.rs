use color_eyre::Result;
use hp_core::{
    BuildRequest, CommandContext, CommandGroup, CommandInfo, CompileRequest, ExecutionOutcome,
    InitRequest, RenderRequest, SyncRequest,
};

use crate::cli::{CommandGroupCli, TargetArgs};

pub fn dispatch_command(
    ctx: &CommandContext,
    group: &CommandGroupCli,
) -> Result<(CommandInfo, ExecutionOutcome)> {
    match group {
        CommandGroupCli::Init(args) => {
            let info = CommandInfo::new(CommandGroup::Init, "init");
            let request = InitRequest {
                mode: args.mode.map(Into::into),
                force: args.force,
            };
            core_call(info, || hp_core::recipe_init(ctx, &request))
        }
        CommandGroupCli::Compile(args) => {
            let info = CommandInfo::new(CommandGroup::Compile, "compile");
            let request = CompileRequest {
                dry_run: args.dry_run,
                generate_hashes: args.generate_hashes,
            };
            core_call(info, || hp_core::deps_compile(ctx, &request))
        }
        CommandGroupCli::Sync(args) => {
            let info = CommandInfo::new(CommandGroup::Sync, "sync");
            let request = sync_request_from_args(args);
            core_call(info, || hp_core::deps_sync(ctx, &request))
        }
        CommandGroupCli::Install(args) => {
            let info = CommandInfo::new(CommandGroup::Install, "install");
            let request = sync_request_from_args(args);
            core_call(info, || hp_core::deps_install(ctx, &request))
        }
        CommandGroupCli::Check => {
            let info = CommandInfo::new(CommandGroup::Check, "check");
            core_call(info, || hp_core::recipe_check(ctx))
        }
        CommandGroupCli::Render(args) => {
            let info = CommandInfo::new(CommandGroup::Render, "render");
            let request = RenderRequest {
                mode: args.mode.map(Into::into),
                out: args.out.clone(),
            };
            core_call(info, || hp_core::recipe_render(ctx, &request))
        }
        CommandGroupCli::Build(args) => {
            let info = CommandInfo::new(CommandGroup::Build, "build");
            let request = BuildRequest {
                out: args.out.clone(),
                tag: args.tag.clone(),
            };
            core_call(info, || hp_core::image_build(ctx, &request))
        }
    }
}

fn sync_request_from_args(args: &TargetArgs) -> SyncRequest {
    SyncRequest {
        target: args.target.clone(),
        dry_run: args.dry_run,
    }
}

fn core_call<F>(info: CommandInfo, action: F) -> Result<(CommandInfo, ExecutionOutcome)>
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    tracing::debug!(command = info.name, "running");
    match action() {
        Ok(outcome) => Ok((info, outcome)),
        Err(err) => {
            if let Some(user) = err.downcast_ref::<hp_core::InstallUserError>() {
                return Ok((
                    info,
                    ExecutionOutcome::user_error(user.message().to_string(), user.details().clone()),
                ));
            }
            let issues: Vec<String> = err.chain().map(ToString::to_string).collect();
            Ok((
                info,
                ExecutionOutcome::failure(
                    err.to_string(),
                    serde_json::json!({
                        "reason": "internal_error",
                        "error": err.to_string(),
                        "issues": issues,
                        "hint": "Re-run with -vv for more detail, or open an issue if this persists.",
                    }),
                ),
            ))
        }
    }
}
