use log::debug;
use sqlmigrate::cli::Cli;

fn main() {
    if let Err(err) = Cli::handle_command_line() {
        debug!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
