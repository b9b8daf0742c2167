//! Command-line front end: run a flow-based process graph.

use std::path::PathBuf;
use clap::Parser;
use rivulet::{component, engine, graph};

#[derive(Parser, Debug)]
#[command(name = "rivulet", version,
  about = "Run a flow-based process graph")]
struct Args {
  /// Graph file to run
  #[arg(short, long)]
  file : PathBuf,
  /// Set the log level (DEBUG|INFO|WARN|ERROR)
  #[arg(long, default_value = "WARN")]
  loglevel : String,
  /// Redirect log entries to a file
  #[arg(long)]
  logfile : Option <PathBuf>,
  /// Step over processes, one-by-one, with the enter key
  #[arg(long)]
  sync : bool,
  /// Write a Graphviz DOT plot of the normalized graph
  #[arg(long)]
  plot : Option <PathBuf>
}

fn init_logging (level : &str, logfile : Option <&std::path::Path>)
  -> Result <(), String>
{
  let filter = level.parse::<log::LevelFilter>()
    .map_err (|_| format!("invalid log level: {level}"))?;
  let mut builder = env_logger::Builder::new();
  builder.filter_level (filter);
  if let Some (path) = logfile {
    let file = std::fs::File::create (path).map_err (|err|
      format!("failed to create log file {}: {err}", path.display()))?;
    builder.target (env_logger::Target::Pipe (Box::new (file)));
  }
  builder.init();
  Ok (())
}

fn main() {
  const EXIT_FAILURE : i32 = 1;
  const EXIT_CONFIG  : i32 = 2;
  let args = Args::parse();
  if let Err (message) = init_logging (&args.loglevel,
    args.logfile.as_deref())
  {
    eprintln!("{message}");
    std::process::exit (EXIT_CONFIG);
  }
  let graph = match graph::Graph::from_path (&args.file) {
    Ok  (graph) => graph,
    Err (err)   => {
      eprintln!("{err}");
      std::process::exit (EXIT_CONFIG);
    }
  };
  let graph = engine::normalize_graph (graph, args.sync);
  if let Some (path) = &args.plot {
    if let Err (err) = std::fs::write (path, graph.dotfile()) {
      eprintln!("failed to write plot {}: {err}", path.display());
      std::process::exit (EXIT_CONFIG);
    }
  }
  let library = std::sync::Arc::new (component::Library::standard());
  match engine::run_graph (&graph, &library) {
    Ok (()) => {}
    Err (err @ engine::Error::Workers (_)) => {
      eprintln!("{err}");
      std::process::exit (EXIT_FAILURE);
    }
    Err (err) => {
      eprintln!("{err}");
      std::process::exit (EXIT_CONFIG);
    }
  }
}
