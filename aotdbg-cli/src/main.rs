//! aotdbg CLI - コマンドラインインターフェース
//!
//! 古いjdbアタッチの解除と、NativeAOTプロセスの文字列を表示するセッションのインターフェース

use anyhow::Result;
use aotdbg_core::{clear_stale_attachment, ClearConfig, Command, Session, SystemSpawner};
use aotdbg_target::{Memory, Process};
use clap::{Args, Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// aotdbg - NativeAOT debugging helper
#[derive(Parser)]
#[command(name = "aotdbg")]
#[command(version = "0.1.0")]
#[command(about = "Debugger helpers for NativeAOT Android samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<HelperCommand>,
}

#[derive(Subcommand)]
enum HelperCommand {
    /// Connect jdb to the forwarded JDWP port and kill it to clear a stale attachment
    Clear(ClearArgs),

    /// Start an interactive session with the string formatter registered
    Session {
        /// Process ID to attach to for memory reads
        #[arg(short, long)]
        pid: Option<i32>,

        #[command(flatten)]
        clear: ClearArgs,
    },
}

#[derive(Args, Clone)]
struct ClearArgs {
    /// Debugger client to launch
    #[arg(long, default_value = aotdbg_core::jdb::DEFAULT_PROGRAM)]
    program: String,

    /// Host of the JDWP endpoint
    #[arg(long, default_value = aotdbg_core::jdb::DEFAULT_HOST)]
    host: String,

    /// Port of the JDWP endpoint
    #[arg(long, default_value_t = aotdbg_core::jdb::DEFAULT_PORT)]
    port: u16,

    /// Milliseconds to wait before killing the client
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,
}

impl From<ClearArgs> for ClearConfig {
    fn from(args: ClearArgs) -> Self {
        ClearConfig {
            program: args.program,
            host: args.host,
            port: args.port,
            settle_delay: Duration::from_millis(args.delay_ms),
            ..ClearConfig::default()
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => run_clear(ClearConfig::default()),
        Some(HelperCommand::Clear(args)) => run_clear(args.into()),
        Some(HelperCommand::Session { pid, clear }) => run_session(pid, clear.into())?,
    }

    Ok(())
}

/// アタッチ解除を実行して結果を表示する
fn run_clear(config: ClearConfig) {
    let report = clear_stale_attachment(&config, &SystemSpawner);
    println!("{}", report.message());
}

/// セッションを初期化してREPLを実行する
fn run_session(pid: Option<i32>, clear_config: ClearConfig) -> Result<()> {
    println!("aotdbg - NativeAOT debugging helper");
    println!("Version 0.1.0");
    println!();

    let mut session = Session::new();
    session.init_module(clear_config);

    let _process = match pid {
        Some(pid) => {
            println!("Attaching to process: {}", pid);
            let process = Process::attach(pid)?;
            session.set_memory(Box::new(Memory::new(process.pid())));
            println!("Attached to process {}", pid);
            println!();
            Some(process)
        }
        None => None,
    };

    run_repl(&session)
}

/// REPLループを実行する
fn run_repl(session: &Session) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(aotdbg) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match handle_command(session, line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// コマンドを処理する（falseを返すとREPLを終了する）
fn handle_command(session: &Session, line: &str) -> Result<bool> {
    match Command::parse(line) {
        Some(Command::Help) => print_help(session),
        Some(Command::Quit) => {
            println!("Goodbye!");
            return Ok(false);
        }
        Some(Command::Print { type_name, address }) => {
            println!("{}", session.print_value(&type_name, address)?);
        }
        Some(Command::Types) => {
            for name in session.formatters().type_names() {
                println!("  {}", name);
            }
        }
        Some(Command::Commands) => {
            for (name, description) in session.commands() {
                println!("  {:<12} - {}", name, description);
            }
        }
        Some(Command::Custom { name, args }) => {
            println!("{}", session.run_command(&name, &args)?);
        }
        None => {
            println!("Unknown command: {}", line);
            println!("Type 'help' for available commands.");
        }
    }

    Ok(true)
}

fn print_help(session: &Session) {
    println!("Available commands:");
    println!();
    println!("  help                 - Show this help message");
    println!("  quit/exit/q          - Exit the session");
    println!("  print <type> <addr>  - Show the object at addr using the formatter for type");
    println!("  types                - List types with a registered formatter");
    println!("  commands             - List registered commands");
    println!();
    println!("Registered commands:");
    for (name, description) in session.commands() {
        println!("  {:<20} - {}", name, description);
    }
    if !session.has_memory() {
        println!();
        println!("Not attached: start with --pid <pid> to read process memory");
    }
    println!();
    println!("Examples:");
    println!("  print System.String 0x7f3c2a001020");
    println!("  clearjdb");
}
