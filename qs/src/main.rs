use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use queuestore::cli::{Cli, Command};
use queuestore::config::Config;
use queuestore::{Task, TaskStore};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("queuestore starting");

    let store = TaskStore::open(&config.queue_dir)?;

    match cli.command {
        Command::Add {
            name,
            description,
            priority,
            category,
        } => {
            let mut task = Task::new(name, description).with_priority(priority);
            if let Some(category) = category {
                task.category = category;
            }
            store.create(&task)?;
            println!("{} Created task: {}", "✓".green(), task.id.cyan());
        }
        Command::List { status } => {
            let status = status.map(|s| s.parse()).transpose().map_err(|e| eyre::eyre!("{e}"))?;
            let tasks = store.list(status)?;
            for task in tasks {
                println!(
                    "{} {} [{}] p{} {}",
                    task.short_id().cyan(),
                    task.status.to_string().yellow(),
                    task.category.dimmed(),
                    task.priority,
                    task.name
                );
            }
        }
        Command::Show { id } => match store.get(&id)? {
            Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
            None => {
                println!("{} Task not found: {}", "✗".red(), id);
                std::process::exit(1);
            }
        },
        Command::Answer { id, question, answer } => {
            let task = store.answer_question(&id, &question, &answer)?;
            println!(
                "{} Answered; task {} is now {}",
                "✓".green(),
                task.short_id().cyan(),
                task.status.to_string().yellow()
            );
        }
        Command::Split { id } => {
            let subtasks = store.approve_split(&id)?;
            println!("{} Split task {} into {} subtasks:", "✓".green(), id.cyan(), subtasks.len());
            for subtask in subtasks {
                println!("  {} {}", subtask.short_id().cyan(), subtask.name);
            }
        }
        Command::Cancel { id } => {
            let task = store.mark_cancelled(&id)?;
            println!("{} Cancelled task: {}", "✓".green(), task.short_id().cyan());
        }
    }

    Ok(())
}
