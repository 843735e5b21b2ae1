use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schema_sql_assistant::components::{build_embedder, initialize_components};
use schema_sql_assistant::config::AppConfig;
use schema_sql_assistant::response_handler::ResponseKind;
use schema_sql_assistant::schema_rag::SchemaRAG;
use schema_sql_assistant::warehouse::{extract_sql, looks_like_sql};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-sql-assistant")]
#[command(about = "Answer questions about your warehouse with schema-grounded SQL")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question in natural language
    Ask {
        query: String,

        /// Number of schema documents to retrieve (default: RETRIEVAL_TOP_K or 3)
        #[arg(short = 'k', long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
        top_k: Option<usize>,

        /// Run the generated SQL against the warehouse
        #[arg(long)]
        execute: bool,
    },
    /// Add schema description files to the vector store.
    /// Each blank-line separated block becomes one document.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    match args.command {
        Command::Ask { query, top_k, execute } => ask(&config, &query, top_k, execute).await,
        Command::Ingest { files } => ingest(&config, &files).await,
    }
}

async fn ask(config: &AppConfig, query: &str, top_k: Option<usize>, execute: bool) -> Result<()> {
    let components = initialize_components(config).await?;
    let handler = components.response_handler(config);

    info!("Query: {}", query);
    let response = match top_k {
        Some(k) => handler.respond_with_k(query, k).await,
        None => handler.respond(query).await,
    };

    println!("{}", response.text);

    if execute {
        if response.kind != ResponseKind::Direct || !looks_like_sql(&response.text) {
            warn!("Response is not an SQL query, nothing to execute");
            return Ok(());
        }
        let sql = extract_sql(&response.text);
        let result = components.warehouse.execute_query(&sql).await?;
        println!("\n{}", result.columns.join("\t"));
        for row in &result.rows {
            let cells: Vec<&str> = row.iter().map(|c| c.as_deref().unwrap_or("NULL")).collect();
            println!("{}", cells.join("\t"));
        }
        println!("({} rows)", result.rows.len());
    }

    Ok(())
}

async fn ingest(config: &AppConfig, files: &[PathBuf]) -> Result<()> {
    let path = config.collection_path();
    let mut rag = SchemaRAG::open(build_embedder(config), &path)?;

    for file in files {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let blocks = split_blocks(&contents);
        let metadata = HashMap::from([("source".to_string(), file.display().to_string())]);
        let ids = rag.add_texts(&blocks, &metadata).await?;
        println!("{}: {} documents", file.display(), ids.len());
    }

    rag.save(&path)?;
    println!("Collection {} now holds {} documents", path.display(), rag.vector_store_len());
    Ok(())
}

fn split_blocks(contents: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_blocks() {
        let contents = "Table customers\n  id INT64\n\n\nTable orders\nid INT64\n   \n";
        assert_eq!(
            split_blocks(contents),
            vec!["Table customers\n  id INT64".to_string(), "Table orders\nid INT64".to_string()]
        );
        assert!(split_blocks("\n \n").is_empty());
    }

    #[test]
    fn test_ask_top_k_must_be_positive() {
        assert!(Args::try_parse_from(["schema-sql-assistant", "ask", "List customers", "-k", "0"]).is_err());

        let args = Args::try_parse_from(["schema-sql-assistant", "ask", "List customers", "-k", "2"]).unwrap();
        match args.command {
            Command::Ask { top_k, .. } => assert_eq!(top_k, Some(2)),
            Command::Ingest { .. } => panic!("expected ask"),
        }
    }
}
