use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "chisel", version, about = "Cut slices of Debian packages into a tree")]
pub struct Cli {
    /// Verbose logging (or set CHISEL_LOG).
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Cut the selected slices into a target directory.
    Cut {
        /// Release directory (chisel.yaml plus slices/).
        #[arg(long)]
        release: PathBuf,

        /// Target directory for the cut tree.
        #[arg(long)]
        root: PathBuf,

        /// Target architecture.
        #[arg(long, default_value_t = default_arch())]
        arch: String,

        /// Local package pool serving every archive.
        #[arg(long)]
        pool: PathBuf,

        /// Slices to install, as package_slice keys.
        #[arg(required = true)]
        slices: Vec<String>,
    },
}

/// Debian name of the architecture this binary runs on.
pub fn default_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "i386",
        "arm" => "armhf",
        "powerpc64" => "ppc64el",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        other => other,
    }
    .to_string()
}
