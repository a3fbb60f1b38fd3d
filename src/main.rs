//! Nested to-do list server
//!
//! Serves the task page and JSON API, or works on the database directly from
//! the command line.

use anyhow::Result;
use clap::Parser;
use nested_todo::cli::{Cli, Command};
use nested_todo::config::{Config, ConfigLoader};
use nested_todo::db::Database;
use nested_todo::error::ApiError;
use nested_todo::logging::{self, LogTarget};
use nested_todo::tree;
use nested_todo::types::{NewTask, Priority};
use nested_todo::web;
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut loader = ConfigLoader::load(cli.config.clone())?;
    for source in loader.sources() {
        debug!(path = %source.display(), "Using config file");
    }

    // Override paths from CLI arguments
    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.clone();
    }

    match cli.command {
        Some(Command::Serve { port, host }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            run_server(loader.into_config()).await?;
        }
        None => run_server(loader.into_config()).await?,
        Some(Command::Tree { hide_completed }) => {
            let config = loader.into_config();
            let db = open_database(&config)?;
            print_tree(&db, hide_completed || config.tree.hide_completed)?;
        }
        Some(Command::Add {
            title,
            parent,
            priority,
        }) => {
            let db = open_database(&loader.into_config())?;
            let mut input = NewTask::titled(title);
            if let Some(parent) = parent {
                input = input.with_parent(parent);
            }
            if let Some(priority) = priority {
                let parsed = Priority::parse(&priority).ok_or_else(|| {
                    ApiError::invalid_value(
                        "priority",
                        format!("Unknown priority '{}'. Expected low, medium or high", priority),
                    )
                })?;
                input = input.with_priority(parsed);
            }
            let task = db.create_task(input)?;
            println!("{}", task.id);
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    config.ensure_db_dir()?;
    Database::open(&config.server.db_path)
}

async fn run_server(config: Config) -> Result<()> {
    let db = Arc::new(open_database(&config)?);
    info!(db = %config.server.db_path.display(), "Database opened");

    let handle = web::start_server(db, &config).await?;
    println!("Listening on http://{}", handle.addr);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");
    handle.shutdown().await;
    Ok(())
}

fn print_tree(db: &Database, hide_completed: bool) -> Result<()> {
    let forest = db.task_tree(hide_completed)?;
    if forest.is_empty() {
        println!("No tasks yet.");
        return Ok(());
    }
    tree::walk(&forest, &mut |node, depth| {
        let task = &node.task;
        let mark = if task.is_completed { "x" } else { " " };
        let mut line = format!(
            "{}[{}] {} ({})",
            "  ".repeat(depth),
            mark,
            task.title,
            task.priority
        );
        if let Some(due) = task.due_date {
            line.push_str(&format!(" due {}", due.format("%Y-%m-%d")));
        }
        if let Some(rule) = task.recurrence() {
            line.push_str(&format!(" [{}]", rule));
        }
        println!("{}  {}", line, task.id);
    });
    Ok(())
}
