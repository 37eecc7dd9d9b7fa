use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use library_rpc::{Catalog, Codec, LibraryServer};
use log::info;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:4000")]
    addr: String,
    /// Wire encoding, must match the clients
    #[arg(long, value_enum, default_value_t = Codec::Json)]
    codec: Codec,
    /// JSON seed file with `users` and `books`; a demo catalog is used otherwise
    #[arg(long)]
    catalog: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    info!("library-server {}", env!("CARGO_PKG_VERSION"));

    let catalog = match &args.catalog {
        Some(path) => Catalog::open(path)?,
        None => Catalog::demo(),
    };
    let server = LibraryServer::new(args.addr.as_str(), catalog, args.codec)?;
    info!(
        "starting server on {} with {:?} encoding",
        server.local_addr()?,
        args.codec
    );
    server.run()?;
    Ok(())
}
