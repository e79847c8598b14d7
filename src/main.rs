mod cli;

use colored::Colorize;
use std::process;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(1);
    }
}
