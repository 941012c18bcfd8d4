/*
 * main.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! luatemplate - render, precompile and inspect Lua text templates

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quarto_luatemplate::{Environment, TemplateCompiler, TemplateOptions};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "luatemplate")]
#[command(version)]
#[command(about = "Render text templates with embedded Lua", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template against a JSON environment
    Render {
        /// Template file
        template: PathBuf,

        /// JSON object whose keys become template variables
        #[arg(short = 'e', long)]
        env: Option<PathBuf>,

        /// JSON object with template options (tags, trim policies, base path)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Write output to FILE instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Expand includes and print the template back in directive syntax
    Precompile {
        /// Template file
        template: PathBuf,

        /// JSON object with template options
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },

    /// List the files a template includes, one per line
    Deps {
        /// Template file
        template: PathBuf,

        /// JSON object with template options
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_luatemplate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            template,
            env,
            config,
            output,
        } => render(&template, env.as_deref(), config.as_deref(), output.as_deref()),
        Commands::Precompile { template, config } => precompile(&template, config.as_deref()),
        Commands::Deps { template, config } => deps(&template, config.as_deref()),
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn load_options(config: Option<&Path>) -> Result<TemplateOptions> {
    let Some(path) = config else {
        return Ok(TemplateOptions::default());
    };
    let partial = read_json(path)?;
    TemplateOptions::from_partial(&partial)
        .with_context(|| format!("Invalid template options in {}", path.display()))
}

fn load_environment(env: Option<&Path>) -> Result<Environment> {
    let Some(path) = env else {
        return Ok(Environment::new());
    };
    let value = read_json(path)?;
    Environment::from_json(&value)
        .with_context(|| format!("Invalid environment in {}", path.display()))
}

fn render(
    template: &Path,
    env: Option<&Path>,
    config: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let compiler = TemplateCompiler::new(load_options(config)?);
    let environment = load_environment(env)?;
    let compiled = compiler
        .compile_file(template)
        .with_context(|| format!("Failed to compile {}", template.display()))?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(io::BufWriter::new(
            fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::BufWriter::new(io::stdout().lock())),
    };

    // Fragments are written as they are produced.
    for fragment in compiled.run(&environment)? {
        let fragment =
            fragment.with_context(|| format!("Failed to render {}", template.display()))?;
        out.write_all(fragment.as_bytes())?;
    }
    out.flush()?;

    if let Some(path) = output {
        info!(output = %path.display(), "Rendered template");
    }
    Ok(())
}

fn precompile(template: &Path, config: Option<&Path>) -> Result<()> {
    let compiler = TemplateCompiler::new(load_options(config)?);
    let source = compiler
        .precompile_file(template)
        .with_context(|| format!("Failed to precompile {}", template.display()))?;
    print!("{}", source);
    Ok(())
}

fn deps(template: &Path, config: Option<&Path>) -> Result<()> {
    let compiler = TemplateCompiler::new(load_options(config)?);
    let dependencies = compiler
        .file_dependencies(template)
        .with_context(|| format!("Failed to resolve includes of {}", template.display()))?;
    for path in dependencies {
        println!("{}", path.display());
    }
    Ok(())
}
