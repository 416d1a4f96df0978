//! pipeconf CLI - inspect collector configurations
//!
//! Usage:
//!   pipeconf dump base.yaml prod.yaml
//!   pipeconf get collector.yaml service.pipelines.traces.receivers
//!   pipeconf check collector.yaml

use clap::{Parser, Subcommand};
use colored::Colorize;
use pipeconf_core::{
    apply_processors, ConfigProcessor, Factories, FileResolver, FileSpec, MapResolver,
    PartialConfig, Value,
};
use pipeconf_group::GroupConfigProcessor;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// pipeconf - Resolve and process telemetry collector configurations
#[derive(Parser)]
#[command(name = "pipeconf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged and processed configuration
    Dump {
        /// Configuration file(s), merged in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Skip the config processors
        #[arg(long)]
        raw: bool,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Get a specific value from the processed configuration
    Get {
        /// Configuration file(s), merged in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Path to the value (e.g., receivers.otlp.endpoint)
        path: String,

        /// Skip the config processors
        #[arg(long)]
        raw: bool,

        /// Output format: text, json, yaml
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Default value if key not found
        #[arg(short, long)]
        default: Option<String>,
    },

    /// Check syntax, processing and section layout
    Check {
        /// Configuration file(s) to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the built-in config processors
    Processors,
}

/// A config processor shipped with the CLI
struct Builtin {
    description: &'static str,
    processor: Arc<dyn ConfigProcessor>,
}

fn builtin_processors() -> Vec<Builtin> {
    vec![Builtin {
        description: "Expand group receivers into their members",
        processor: Arc::new(GroupConfigProcessor::new()),
    }]
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Dump {
            files,
            raw,
            format,
            output,
        } => cmd_dump(files, raw, &format, output),

        Commands::Get {
            files,
            path,
            raw,
            format,
            default,
        } => cmd_get(files, &path, raw, &format, default),

        Commands::Check { files } => cmd_check(files),

        Commands::Processors => cmd_processors(),
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    Ok(runtime.block_on(future))
}

fn resolve_files(files: &[PathBuf]) -> Result<Value, String> {
    if files.is_empty() {
        return Err("No configuration files specified".to_string());
    }
    let resolver = FileResolver::new(files.iter().map(FileSpec::required).collect());
    block_on(resolver.resolve())?.map_err(|e| format!("Failed to load configuration: {}", e))
}

fn process(tree: Value) -> pipeconf_core::Result<Value> {
    let processors: Vec<Arc<dyn ConfigProcessor>> = builtin_processors()
        .into_iter()
        .map(|b| b.processor)
        .collect();
    apply_processors(tree, &Factories::new(), &processors)
}

fn load_tree(files: &[PathBuf], raw: bool) -> Result<Value, String> {
    let tree = resolve_files(files)?;
    if raw {
        return Ok(tree);
    }
    process(tree).map_err(|e| e.to_string())
}

fn render(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        _ => Err(format!("Unsupported format: {}. Use yaml or json.", format)),
    }
}

fn render_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(format!("{}\n", s)),
        Value::Integer(i) => Ok(format!("{}\n", i)),
        Value::Float(f) => Ok(format!("{}\n", f)),
        Value::Bool(b) => Ok(format!("{}\n", b)),
        Value::Null => Ok("null\n".to_string()),
        // Complex values are printed as YAML
        _ => render(value, "yaml"),
    }
}

fn cmd_dump(files: Vec<PathBuf>, raw: bool, format: &str, output: Option<PathBuf>) -> ExitCode {
    let tree = match load_tree(&files, raw) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    match render(&tree, format) {
        Ok(content) => {
            if let Some(output_path) = output {
                if let Err(e) = std::fs::write(&output_path, &content) {
                    eprintln!("{}: {}", "Error writing file".red(), e);
                    return ExitCode::from(2);
                }
                eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
            } else {
                print!("{}", content);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn cmd_get(
    files: Vec<PathBuf>,
    path: &str,
    raw: bool,
    format: &str,
    default: Option<String>,
) -> ExitCode {
    let tree = match load_tree(&files, raw) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    match tree.get_path(path) {
        Ok(value) => {
            let rendered = match format {
                "json" | "yaml" | "yml" => render(value, format),
                _ => render_text(value),
            };
            match rendered {
                Ok(content) => {
                    print!("{}", content);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    ExitCode::from(1)
                }
            }
        }
        Err(_) => {
            if let Some(default_val) = default {
                println!("{}", default_val);
                ExitCode::SUCCESS
            } else {
                eprintln!("{}: Path '{}' not found", "Error".red(), path);
                ExitCode::from(1)
            }
        }
    }
}

fn cmd_check(files: Vec<PathBuf>) -> ExitCode {
    let mut all_valid = true;

    for file in &files {
        match resolve_files(std::slice::from_ref(file)) {
            Ok(_) => {
                let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
                println!(
                    "{} {}: valid {}",
                    "✓".green(),
                    file.display(),
                    if ext == "json" { "JSON" } else { "YAML" }
                );
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                all_valid = false;
            }
        }
    }
    if !all_valid {
        return ExitCode::from(1);
    }

    let checked = resolve_files(&files).and_then(|tree| {
        let processed = process(tree).map_err(|e| e.to_string())?;
        PartialConfig::from_value(processed).map_err(|e| e.to_string())
    });
    match checked {
        Ok(partial) => {
            let count: usize = pipeconf_core::Kind::ALL
                .iter()
                .map(|kind| partial.components(*kind).len())
                .sum();
            println!(
                "{} processed configuration is well formed ({} component(s))",
                "✓".green(),
                count
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} Processing failed\n", "✗".red());
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn cmd_processors() -> ExitCode {
    for builtin in builtin_processors() {
        println!(
            "{}  {}",
            builtin.processor.config_key().bold(),
            builtin.description
        );
    }
    ExitCode::SUCCESS
}
