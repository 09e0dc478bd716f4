mod cli;
mod config;
mod db;
mod error;

use cli::Cli;

fn main() {
    // Runs before anything else touches the database. A failure (including a refused
    // downgrade or a failed migration) must stop the process.
    if let Err(err) = Cli::handle_command_line() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
