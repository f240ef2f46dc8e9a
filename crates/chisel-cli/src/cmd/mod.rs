use anyhow::Result;

use crate::args::{Cli, Command};

mod cut;

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Cut {
            release,
            root,
            arch,
            pool,
            slices,
        } => cut::run(&release, &root, &arch, &pool, &slices),
    }
}
