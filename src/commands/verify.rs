//! The verify command: status only, no fixes.

use crate::cli::VerifyArgs;
use crate::host::LocalHost;
use crate::report::print_verify;
use crate::{Context, loader};
use anyhow::{Result, bail};

pub fn run(_ctx: &Context, args: &VerifyArgs) -> Result<()> {
    let node = loader::load(&args.config)?;
    let reports = node.verify(&LocalHost, args.jobs)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_verify(node.name(), &reports);
    }

    let broken = reports.iter().filter(|report| report.error.is_some()).count();
    if broken > 0 {
        bail!("{broken} item(s) could not be verified on {}", node.name());
    }
    Ok(())
}
