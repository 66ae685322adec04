use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use pantry_agents::PantryAgents;
use pantry_core::{extract_structured, NewPantryItem};
use pantry_llm::ModelBackend;
use pantry_observability::{init_tracing, AppMetrics};
use pantry_storage::{NutritionRepository, PantryRepository, Store};
use serde::Serialize;

type Agents = PantryAgents<Store, ModelBackend>;

#[derive(Debug, Parser)]
#[command(name = "pantry")]
#[command(about = "Pantry Concierge CLI")]
struct Cli {
    /// SQLite URL; the in-memory store is used when omitted.
    #[arg(long, env = "PANTRY_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat,
    Classify {
        message: String,
    },
    /// Pull the structured payload out of model text read from stdin.
    Extract,
    AnalyzeMeal {
        description: String,
        /// Store the estimate as today's nutrition log.
        #[arg(long)]
        log: bool,
    },
    Recipes {
        #[arg(long, default_value = "")]
        preferences: String,
        #[arg(long, default_value = "")]
        time_of_day: String,
    },
    Scan {
        path: PathBuf,
        /// Add the detected items to the pantry.
        #[arg(long)]
        add: bool,
    },
    Summary,
    Ask {
        prompt: String,
    },
    Pantry {
        #[command(subcommand)]
        command: PantryCommand,
    },
    Nutrition {
        #[command(subcommand)]
        command: NutritionCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PantryCommand {
    List,
    Add {
        name: String,
        quantity: f64,
        unit: String,
        /// Expiry date as YYYY-MM-DD.
        #[arg(long)]
        expires: Option<NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
enum NutritionCommand {
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("pantry_cli");
    let cli = Cli::parse();

    let agents = build_agents(cli.database_url.as_deref()).await?;

    match cli.command {
        Command::Chat => run_chat(&agents).await?,
        Command::Classify { message } => print_json(&agents.classify(&message).await)?,
        Command::Extract => run_extract()?,
        Command::AnalyzeMeal { description, log } => {
            if log {
                print_json(&agents.log_meal(&description).await?)?;
            } else {
                print_json(&agents.analyze_meal(&description).await?)?;
            }
        }
        Command::Recipes {
            preferences,
            time_of_day,
        } => {
            let recipes = agents
                .recipes_from_pantry(&preferences, &time_of_day)
                .await?;
            print_json(&recipes)?;
        }
        Command::Scan { path, add } => {
            let mime_type = mime_from_path(&path)?;
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed reading image {}", path.display()))?;
            if add {
                print_json(&agents.scan_into_pantry(bytes, mime_type).await?)?;
            } else {
                print_json(&agents.scan_image(bytes, mime_type).await?)?;
            }
        }
        Command::Summary => println!("{}", agents.health_summary().await?),
        Command::Ask { prompt } => println!("{}", agents.ask(&prompt).await?),
        Command::Pantry { command } => match command {
            PantryCommand::List => print_json(&agents.store().list_pantry().await?)?,
            PantryCommand::Add {
                name,
                quantity,
                unit,
                expires,
            } => {
                let item = agents
                    .store()
                    .create_pantry_item(NewPantryItem {
                        name,
                        quantity,
                        unit,
                        expiry_date: expires,
                    })
                    .await?;
                print_json(&item)?;
            }
        },
        Command::Nutrition { command } => match command {
            NutritionCommand::List => {
                print_json(&agents.store().list_nutrition_logs().await?)?
            }
        },
    }

    Ok(())
}

async fn run_chat(agents: &Agents) -> Result<()> {
    println!("Pantry Concierge chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }
        if message.is_empty() {
            continue;
        }

        let decision = agents.classify(message).await;
        println!("\n{}\n", decision.response);
        println!("[intent: {}]", decision.intent);
        if !decision.extracted_data.is_empty() {
            println!("[extracted: {}]", decision.extracted_data);
        }
        println!();
    }

    Ok(())
}

fn run_extract() -> Result<()> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("failed reading model text from stdin")?;

    match extract_structured(&raw) {
        Ok(value) => print_json(&value),
        Err(err) => bail!("{err} (candidate: {:?})", err.candidate()),
    }
}

fn mime_from_path(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let mime_type = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => bail!("{} does not look like an image file", path.display()),
    };
    Ok(mime_type)
}

async fn build_agents(database_url: Option<&str>) -> Result<Agents> {
    let metrics = AppMetrics::shared();

    let store = match database_url {
        Some(url) => Store::sqlite(url).await?,
        None => Store::memory(),
    };
    let model = ModelBackend::from_env().context("failed to initialize model client")?;

    Ok(PantryAgents::new(Arc::new(store), Arc::new(model), metrics))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
