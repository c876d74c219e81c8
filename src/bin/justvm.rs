//! CLI for the justvm scope resolver and debugger channel.
//!
//! Usage:
//!   justvm scopes <file.js> [--module|--eval] [--debug-mode] [--json]
//!   justvm check <file.js>
//!   justvm debugger '<json command>'...

use std::fs;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use justvm::compiler::{self, CompileError, ContextGraph, ContextType};
use justvm::parser::JsParser;
use justvm::runner::vm::config::EngineConfig;
use justvm::runner::vm::debugger::DebugSession;

#[derive(Parser)]
#[command(name = "justvm", version, about = "Scope resolver and debugger tooling for the justvm engine")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the context graph of a script.
    Scopes {
        file: String,
        /// Resolve the top level as a module.
        #[arg(long, conflicts_with = "eval")]
        module: bool,
        /// Resolve the top level as eval code.
        #[arg(long)]
        eval: bool,
        /// Every variable escapes.
        #[arg(long)]
        debug_mode: bool,
        #[arg(long)]
        json: bool,
    },
    /// Parse and resolve a script, reporting the first static error.
    Check { file: String },
    /// Feed JSON commands to a fresh debug session.
    Debugger { commands: Vec<String> },
}

fn main() {
    let cli = Cli::parse();
    let fallback = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Command::Scopes {
            file,
            module,
            eval,
            debug_mode,
            json,
        } => {
            let default_type = if module {
                ContextType::Module
            } else if eval {
                ContextType::Eval
            } else {
                ContextType::Global
            };
            let mut options = EngineConfig::from_env().resolver_options();
            options.debug_mode |= debug_mode;
            let graph = match read_source(&file).and_then(|s| compile(&s, default_type, &options)) {
                Ok(graph) => graph,
                Err(message) => fail(&file, &message),
            };
            if json {
                match serde_json::to_string_pretty(&graph) {
                    Ok(s) => println!("{}", s),
                    Err(e) => fail(&file, &e.to_string()),
                }
            } else {
                print_graph(&graph);
            }
        }
        Command::Check { file } => {
            let options = EngineConfig::from_env().resolver_options();
            match read_source(&file).and_then(|s| compile(&s, ContextType::Global, &options)) {
                Ok(graph) => println!("{}: ok ({} contexts)", file, graph.len()),
                Err(message) => fail(&file, &message),
            }
        }
        Command::Debugger { commands } => {
            let mut session = DebugSession::new();
            for command in &commands {
                println!("{}", session.handle_command(command));
            }
        }
    }
}

fn read_source(file: &str) -> Result<String, String> {
    fs::read_to_string(file).map_err(|e| format!("cannot read file: {}", e))
}

fn compile(source: &str, default_type: ContextType, options: &compiler::ResolverOptions) -> Result<ContextGraph, String> {
    let program = JsParser::parse_to_ast_from_str(source).map_err(|e| describe(&e))?;
    compiler::resolve(&program, default_type, options).map_err(|e| describe(&e))
}

fn describe(e: &CompileError) -> String {
    match e {
        CompileError::Parse { .. } => format!("parse error at {}", e),
        CompileError::Syntax { name, .. } => format!("syntax error at {} ('{}')", e, name),
    }
}

fn fail(file: &str, message: &str) -> ! {
    eprintln!("{}: {}", file, message);
    process::exit(1);
}

fn print_graph(graph: &ContextGraph) {
    if let Some(root) = graph.root() {
        print_context(graph, root.id, 0);
    }
}

fn print_context(graph: &ContextGraph, id: compiler::ContextId, level: usize) {
    let c = graph.get(id);
    let pad = "  ".repeat(level);
    let mut flags = vec![];
    if c.is_strict {
        flags.push("strict");
    }
    if c.requires_execution_context {
        flags.push("heap");
    }
    if c.arguments_can_escape {
        flags.push("args-escape");
    }
    if c.has_direct_eval {
        flags.push("eval");
    }
    if c.has_with {
        flags.push("with");
    }
    if c.has_try {
        flags.push("try");
    }
    if c.is_arrow {
        flags.push("arrow");
    }
    println!(
        "{}{:?} {} [{}] line {}",
        pad,
        c.context_type,
        c.name.as_deref().unwrap_or("-"),
        flags.join(","),
        c.line
    );
    if !c.arguments.is_empty() {
        println!("{}  formals: {}", pad, c.arguments.join(", "));
    }
    for (name, m) in &c.members {
        println!(
            "{}  {} {:?} {:?} slot {}{}",
            pad,
            name,
            m.member_type,
            m.scope,
            m.index,
            if m.can_escape { " escapes" } else { "" }
        );
    }
    for child in graph.children(id) {
        print_context(graph, child.id, level + 1);
    }
}
