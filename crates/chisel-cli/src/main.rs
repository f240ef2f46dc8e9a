use clap::Parser;

mod args;
mod cmd;
mod output;

fn main() {
    let cli = args::Cli::parse();
    output::init_logging(cli.verbose);

    if let Err(err) = cmd::dispatch(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
