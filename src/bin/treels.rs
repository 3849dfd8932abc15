use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use env_logger::Env;
use file_tree_cache::backend::FsBackend;
use file_tree_cache::collate::{SortColumn, SortDirection, SortSpec};
use file_tree_cache::config::ModelConfig;
use file_tree_cache::item::PopulateState;
use file_tree_cache::model::TreeModel;
use file_tree_cache::util::{format_size, format_system_time};
use pico_args::Arguments;
use shellexpand::full;

fn main() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(""))
        .format_timestamp_secs()
        .try_init();

    let mut args = Arguments::from_env();

    let sort_arg = match args.opt_value_from_str::<_, String>("--sort") {
        Ok(value) => value,
        Err(err) => {
            eprintln!("treels: {err}");
            process::exit(1);
        }
    };
    let descending = args.contains("--desc");
    let include_hidden = args.contains("--hidden");

    let path_arg: Option<String> = match args.opt_free_from_str() {
        Ok(value) => value,
        Err(err) => {
            eprintln!("treels: {err}");
            process::exit(1);
        }
    };

    let leftover = args.finish();
    if !leftover.is_empty() {
        let extras: Vec<String> = leftover
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        eprintln!("treels: unexpected arguments: {}", extras.join(" "));
        process::exit(1);
    }

    let column = match sort_arg.as_deref() {
        None | Some("name") => SortColumn::Name,
        Some("size") => SortColumn::Size,
        Some("type") => SortColumn::Type,
        Some("modified") => SortColumn::Modified,
        Some("created") => SortColumn::Created,
        Some(other) => {
            eprintln!("treels: unknown sort column '{other}'");
            process::exit(1);
        }
    };

    let root = match resolve_root(path_arg) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("treels: {err}");
            process::exit(1);
        }
    };

    let config = ModelConfig {
        enable_watcher: false,
        sort: SortSpec {
            column,
            direction: if descending {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            },
        },
        ..ModelConfig::default()
    };

    let backend = Arc::new(FsBackend { include_hidden });
    let mut model = TreeModel::new(backend, config);
    let root_id = model.set_root(root.clone());

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        model.process_events();
        let Some(item) = model.item(root_id) else {
            eprintln!("treels: root vanished");
            process::exit(1);
        };
        match item.state {
            PopulateState::Fetched => break,
            PopulateState::Error => {
                let message = item
                    .error
                    .as_ref()
                    .map(|err| err.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                eprintln!("treels: {}: {message}", root.display());
                process::exit(1);
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            eprintln!("treels: timed out listing {}", root.display());
            process::exit(1);
        }
        thread::sleep(Duration::from_millis(10));
    }

    for child in model.children(root_id) {
        let Some(item) = model.item(*child) else {
            continue;
        };
        println!(
            "{:<10} {:>10}  {:16}  {}",
            item.type_label,
            format_size(item.size),
            format_system_time(item.modified),
            item.display_name
        );
    }
}

fn resolve_root(path_arg: Option<String>) -> Result<PathBuf, String> {
    let raw = path_arg.unwrap_or_else(|| ".".to_string());
    let expanded = full(raw.as_str()).map_err(|err| err.to_string())?;
    let path = PathBuf::from(expanded.as_ref());
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()));
    }
    if !path.is_dir() {
        return Err(format!("{} is not a directory", path.display()));
    }
    path.canonicalize()
        .map_err(|err| format!("failed to canonicalize {}: {err}", path.display()))
}
