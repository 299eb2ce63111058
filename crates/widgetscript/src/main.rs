use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug, info};
use widgetscript::{
    Config, ContextCompiler, FlatUnit, FunctionUnit, PrecompiledContext, RawUnit, SourceUnit,
    rewriter::rewrite_source, source::split_module_functions,
};

#[derive(Parser, Debug)]
#[command(name = "widgetscript")]
#[command(about = "Compile Python widget code into injectable context factories")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./widgetscript.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile every top-level function of FILE into a precompiled context
    Compile {
        /// Python module holding the functions
        file: PathBuf,

        /// Lift the body of this parameterless function to top level
        #[arg(long = "flat", value_name = "NAME")]
        flat: Vec<String>,

        /// Run this function once whenever a context is created
        #[arg(long = "init", value_name = "NAME")]
        init: Vec<String>,

        /// Append a JavaScript file verbatim
        #[arg(long = "raw", value_name = "JS_FILE")]
        raw: Vec<PathBuf>,

        /// Skip the minify stage
        #[arg(long)]
        no_minify: bool,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the rewritten Python source of every function in FILE
    Rewrite {
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Compile {
            file,
            flat,
            init,
            raw,
            no_minify,
            output,
        } => compile(
            cli.config.as_deref(),
            &file,
            &flat,
            &init,
            &raw,
            no_minify,
            output.as_deref(),
        ),
        Command::Rewrite { file } => rewrite(&file),
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn compile(
    config: Option<&Path>,
    file: &Path,
    flat: &[String],
    init: &[String],
    raw: &[PathBuf],
    no_minify: bool,
    output: Option<&Path>,
) -> Result<()> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let compiler = ContextCompiler::from_config(&config).context("Invalid configuration")?;

    let source = read_source(file)?;
    let functions = split_module_functions(&source)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    for name in flat.iter().chain(init) {
        if !functions.iter().any(|(function, _)| function == name) {
            bail!("No top-level function `{name}` in {}", file.display());
        }
    }

    let mut units = Vec::with_capacity(functions.len() + raw.len());
    let mut initializers = Vec::new();
    for (name, text) in &functions {
        let unit: SourceUnit = if flat.contains(name) {
            FlatUnit::new(text)
                .with_context(|| format!("Invalid flat function `{name}`"))?
                .into()
        } else {
            let unit = FunctionUnit::new(text)
                .with_context(|| format!("Invalid function `{name}`"))?;
            if init.contains(name) {
                initializers.push(unit.clone());
            }
            unit.into()
        };
        debug!("Unit `{name}` added");
        units.push(unit);
    }
    for path in raw {
        units.push(RawUnit::new(&read_source(path)?).into());
    }

    let minify = config.minify && !no_minify;
    let script = compiler
        .compile_with_initializers(&units, &initializers, minify)
        .with_context(|| format!("Failed to compile {}", file.display()))?;
    let precompiled = PrecompiledContext::new(script);

    match output {
        Some(path) => {
            precompiled
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote precompiled context to {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(precompiled.script().text().as_bytes())
                .context("Failed to write to stdout")?;
            stdout.flush().context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

fn rewrite(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let functions = split_module_functions(&source)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let mut stdout = io::stdout().lock();
    for (name, text) in &functions {
        let rewritten =
            rewrite_source(text).with_context(|| format!("Failed to rewrite `{name}`"))?;
        writeln!(stdout, "{rewritten}").context("Failed to write to stdout")?;
    }
    Ok(())
}
