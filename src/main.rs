#![allow(warnings)]
use std::path::PathBuf;

use structopt::StructOpt;

pub mod deps {
    pub(crate) use env_logger;
    pub(crate) use log;
    pub(crate) use structopt;

    pub(crate) use sdbmrs;
}

use crate::deps::{
    log::{
        debug,
        info,
    },
    sdbmrs::{
        Error,
        OpenFlags,
        Store,
        StoreFlag,
    },
};

mod cli {
    pub fn println<T>(
        value: &T,
        verbose: bool,
    ) where
        T: std::fmt::Debug,
    {
        if verbose {
            println!("{:#?}", value);
        } else {
            println!("{:?}", value);
        }
    }

    /// Render a datum the way a terminal can actually read it: UTF-8 where
    /// possible, lossy otherwise.
    pub fn render(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

macro_rules! panic_on_err {
    () => {
        |err| panic!("[ERROR] {}:{}: {}", err, module_path!(), line!())
    };
}

#[derive(Debug, StructOpt)]
#[structopt(name = "sdbmrs", about = "a small disk-resident key-value store")]
struct Args {
    #[structopt(short, long)]
    debug: bool,

    #[structopt(short, long)]
    verbose: bool,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Create an empty store at the given path prefix.
    Create { prefix: PathBuf },
    /// Look up a key.
    Get { prefix: PathBuf, key: String },
    /// Store a key/value pair.
    Put {
        prefix: PathBuf,
        key: String,
        value: String,
        #[structopt(long)]
        replace: bool,
    },
    /// Remove a key.
    Delete { prefix: PathBuf, key: String },
    /// List every stored key.
    List { prefix: PathBuf },
}

fn create_command(
    args: &Args,
    prefix: &PathBuf,
) {
    let store = Store::open(prefix, OpenFlags::ReadWrite, true).unwrap_or_else(panic_on_err!());
    store.close().unwrap_or_else(panic_on_err!());
    println!("created store at {:?}", prefix);
}

fn get_command(
    args: &Args,
    prefix: &PathBuf,
    key: &str,
) {
    let mut store = Store::open(prefix, OpenFlags::ReadOnly, false).unwrap_or_else(panic_on_err!());
    match store.fetch(key.as_bytes()).unwrap_or_else(panic_on_err!()) {
        Some(val) => println!("{}", cli::render(&val)),
        None => println!("(not found)"),
    }
}

fn put_command(
    args: &Args,
    prefix: &PathBuf,
    key: &str,
    value: &str,
    replace: bool,
) {
    let flag = if replace { StoreFlag::Replace } else { StoreFlag::Insert };
    let mut store = Store::open(prefix, OpenFlags::ReadWrite, true).unwrap_or_else(panic_on_err!());
    store.store(key.as_bytes(), value.as_bytes(), flag).unwrap_or_else(panic_on_err!());
    store.close().unwrap_or_else(panic_on_err!());
}

fn delete_command(
    args: &Args,
    prefix: &PathBuf,
    key: &str,
) {
    let mut store = Store::open(prefix, OpenFlags::ReadWrite, false).unwrap_or_else(panic_on_err!());
    let found = store.delete(key.as_bytes()).unwrap_or_else(panic_on_err!());
    store.close().unwrap_or_else(panic_on_err!());
    cli::println(&found, args.verbose);
}

fn list_command(
    args: &Args,
    prefix: &PathBuf,
) {
    let mut store = Store::open(prefix, OpenFlags::ReadOnly, false).unwrap_or_else(panic_on_err!());
    for key in store.iter() {
        let key = key.unwrap_or_else(panic_on_err!());
        println!("{}", cli::render(&key));
    }
}

fn main() {
    let args = Args::from_args();
    if args.debug {
        crate::deps::env_logger::builder()
            .filter_level(crate::deps::log::LevelFilter::Debug)
            .init();
    } else {
        crate::deps::env_logger::builder()
            .filter_level(crate::deps::log::LevelFilter::Warn)
            .init();
    }

    debug!("program arguments: {:#?}", args);

    match &args.cmd {
        Command::Create { prefix } => create_command(&args, prefix),
        Command::Get { prefix, key } => get_command(&args, prefix, key),
        Command::Put { prefix, key, value, replace } => put_command(&args, prefix, key, value, *replace),
        Command::Delete { prefix, key } => delete_command(&args, prefix, key),
        Command::List { prefix } => list_command(&args, prefix),
    }
}
