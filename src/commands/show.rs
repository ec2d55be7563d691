//! The show command: one item's declared state as JSON.

use crate::cli::ShowArgs;
use crate::{Context, loader};
use anyhow::Result;

pub fn run(_ctx: &Context, args: &ShowArgs) -> Result<()> {
    let node = loader::load(&args.config)?;
    let desired = node.desired_state(&args.item)?;
    println!("{}", serde_json::to_string_pretty(&desired)?);
    Ok(())
}
