use clap::Parser;
use clio::Input;

#[derive(Debug, Parser)]
#[command(name = "auth-service", about = "User registration and session token service")]
pub struct Opt {
    /// Config file path
    #[arg(short, long, value_parser, default_value = "config.toml")]
    pub config: Input,
}
