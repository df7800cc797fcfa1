pub mod commands;
pub mod events;
pub mod logging;
pub mod models;
pub mod query;
pub mod state;
pub mod storage;

#[cfg(feature = "app")]
pub mod cli;

#[cfg(all(feature = "app", not(test)))]
pub fn run() {
    use clap::Parser;

    let cli = cli::Cli::parse();
    let data_dir = match cli::resolve_data_dir(cli.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(1);
        }
    };
    if let Err(error) = logging::init_logging(&data_dir) {
        eprintln!("warning: file logging disabled: {error}");
    }
    if let Err(error) = cli::dispatch(&data_dir, cli.command) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
