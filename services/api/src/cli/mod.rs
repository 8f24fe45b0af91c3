//! services/api/src/cli/mod.rs
//!
//! Command line front end: `import` downloads one book, `server` runs the HTTP API.

pub mod import;
pub mod server;

use clap::{Parser, Subcommand};

pub use import::{run_import, ImportArgs};
pub use server::{run_server, ServerArgs};

#[derive(Debug, Parser)]
#[command(name = "edubase-to-pdf", about = "Download Edubase books as PDF files", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download a book into <title>.pdf
    Import(ImportArgs),
    /// Run the HTTP server
    Server(ServerArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse() {
        let cli = Cli::parse_from(["edubase-to-pdf", "server", "-P", "9090"]);
        assert!(matches!(cli.command, Command::Server(ServerArgs { port: Some(9090), .. })));

        let cli = Cli::parse_from(["edubase-to-pdf", "import", "-b", "58216"]);
        assert!(matches!(cli.command, Command::Import(ImportArgs { book_id: Some(58216), .. })));
    }

    #[test]
    fn credentials_must_come_together() {
        let result = Cli::try_parse_from(["edubase-to-pdf", "import", "-e", "reader@example.com"]);
        assert!(result.is_err());
    }
}
