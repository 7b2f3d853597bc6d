use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "syncer", about = "Synchronize table extracts into Postgres")]
pub struct Args {
    /// Profile to run; may be repeated. Every configured profile runs when omitted.
    #[arg(short, long = "profile", value_name = "NAME")]
    pub profiles: Vec<String>,

    /// Read and validate the extracts without connecting to the database.
    #[arg(long)]
    pub check: bool,
}
