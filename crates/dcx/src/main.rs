use clap::Parser;

mod cli;
mod commands;

fn main() {
    if let Err(e) = dcx_core::logging::init() {
        eprintln!("dcx: could not initialize logging: {}", e);
    }

    let parsed = cli::Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("dcx: could not start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(parsed.dispatch()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("dcx: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
