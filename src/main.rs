mod config;
mod helpers;
mod hierarchy;
mod manager;
mod myprocess;
mod sorted;
mod source;
mod tui;

use std::collections::HashSet;

use gumdrop::Options;

use crate::{
    config::{Config, Mode},
    helpers::format_label,
    manager::{ProcFilter, ProcManager},
    sorted::SortKey,
};

#[derive(Options)]
struct Args {
    #[options(help = "Show tui (default)")]
    tui: bool,

    #[options(help = "Print tree to stdout")]
    out: bool,

    #[options(help = "Sort by pid, name, owner or memory", meta = "<KEY>")]
    sort: Option<SortKey>,

    #[options(help = "Only show processes with this pid or name", meta = "<PID|NAME>")]
    filter: Option<String>,

    #[options(help = "Print help message")]
    help: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let ops = Args::parse_args_default_or_exit();
    let mut config = Config::load();
    if let Some(sort) = ops.sort {
        config.tui.sort_key = sort;
    }
    let filter = ops
        .filter
        .as_deref()
        .map(ProcFilter::parse)
        .unwrap_or_default();

    if ops.tui {
        run_tui(config, filter);
    } else if ops.out {
        run_output(config.tui.sort_key, filter);
    } else {
        //no arguments so we use config or default
        match config.mode {
            Mode::Tui => run_tui(config, filter),
            Mode::Out => run_output(config.tui.sort_key, filter),
        }
    }
}

fn run_tui(config: Config, filter: ProcFilter) {
    if let Err(err) = tui::run(config, filter) {
        log::error!("terminal error: {err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run_output(sort: SortKey, filter: ProcFilter) {
    let man = ProcManager::new(filter);
    if man.procs().is_empty() {
        eprintln!("no matching processes");
        return;
    }
    let forest = man.view(sort);
    for row in forest.rows(&HashSet::new()) {
        if let Some(proc) = man.procs().get(row.pid) {
            println!("{}{}", row.guide, format_label(proc));
        }
    }
}
