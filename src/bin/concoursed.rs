//! Standalone Concourse server process (`cli` feature). Loads a TOML
//! config, opens (or creates) an engine over its buffer/database
//! directories, and idles — the RPC wire layer that would actually serve
//! requests against the engine is out of scope here.

use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use concourse::{Config, Engine};

/// Command line options (§6 CLI/env).
#[derive(Clone, StructOpt)]
pub struct Opt {
    #[structopt(long = "config", parse(from_os_str))]
    config: Option<PathBuf>,

    #[structopt(long = "buffer-directory", parse(from_os_str), default_value = "data/buffer")]
    buffer_directory: PathBuf,

    #[structopt(long = "database-directory", parse(from_os_str), default_value = "data/database")]
    database_directory: PathBuf,

    #[structopt(long = "buffer-page-size", default_value = "8388608")]
    buffer_page_size: usize,

    #[structopt(long = "log-level", default_value = "info")]
    log_level: String,

    #[structopt(long = "fresh")]
    fresh: bool,
}

fn load_config(opt: &Opt) -> Config {
    match &opt.config {
        Some(path) => Config::from_toml_file(path).unwrap_or_else(|err| {
            eprintln!("concoursed: error reading config {:?}: {}", path, err);
            process::exit(1);
        }),
        None => Config::new(opt.buffer_directory.clone(), opt.database_directory.clone())
            .buffer_page_size(opt.buffer_page_size)
            .log_level(opt.log_level.clone()),
    }
}

fn main() {
    let opt = Opt::from_args();
    let config = load_config(&opt);

    if let Err(err) = config.validate() {
        eprintln!("concoursed: invalid config: {}", err);
        process::exit(1);
    }

    let engine = if opt.fresh {
        Engine::new(&config)
    } else {
        Engine::open(&config)
    };

    match engine {
        Ok(_engine) => println!("concoursed: engine ready at {:?}", config.database_directory),
        Err(err) => {
            eprintln!("concoursed: failed to start: {}", err);
            process::exit(1);
        }
    }
}
