use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tenantgate")]
#[command(author, version, about = "Multi-tenant TCP to HTTP gateway", long_about = None)]
pub struct Cli {
    /// Gateway settings file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (debug, info, warn, error); overrides [logging] level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, plain); overrides [logging] format
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway
    Serve(ServeArgs),

    /// Check a tenants file and print a summary
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Override tenants file
    #[arg(long)]
    pub tenants_file: Option<PathBuf>,

    /// Override admin bind address
    #[arg(long)]
    pub admin_bind: Option<String>,

    /// Override listen IP for tenant ports
    #[arg(long)]
    pub listen_ip: Option<String>,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Tenants file to check; the configured one when omitted
    #[arg(long)]
    pub tenants_file: Option<PathBuf>,
}
