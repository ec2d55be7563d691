//! The apply command.

use crate::cli::ApplyArgs;
use crate::host::LocalHost;
use crate::report::{BarSink, TerminalConfirm, print_apply};
use crate::{Context, loader};
use anyhow::{Result, bail};
use reconcile::{ApplyOptions, AutoConfirm, CancelToken, Confirm};

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let node = loader::load(&args.config)?;

    // Interactive prompts cannot interleave across workers.
    let jobs = if args.interactive { 1 } else { args.jobs };
    if args.interactive && args.jobs != 1 {
        log::debug!("interactive mode forces a single worker");
    }
    let opts = ApplyOptions {
        dry_run: args.dry_run,
        jobs,
        interactive: args.interactive,
        target: args.target.clone(),
    };

    let confirm: &dyn Confirm = if args.interactive {
        &TerminalConfirm
    } else {
        &AutoConfirm
    };
    let progress = BarSink::new(node.items().len());
    let cancel = CancelToken::new();

    let report = node.apply(&LocalHost, &opts, confirm, &progress, &cancel)?;
    progress.finish();

    print_apply(node.name(), &report, ctx.verbose > 0);
    if !report.summary.is_success() {
        bail!("{} item(s) failed on {}", report.summary.failed, node.name());
    }
    Ok(())
}
