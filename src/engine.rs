//! Load → normalize → run pipeline.

use std::path::Path;
use std::sync::Arc;
use crate::component;
use crate::graph;
use crate::network;
use crate::normalize;

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

/// Top-level runtime error.
#[derive(Debug)]
pub enum Error {
  /// The graph file could not be loaded.
  Load    (graph::LoadError),
  /// The graph failed validation against the component library.
  Config  (Vec <network::ConfigError>),
  /// One or more workers terminated by panic.
  Workers (network::StopError)
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for Error {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      Error::Load (ref err) => write!(f, "{err}"),
      Error::Config (ref errors) => {
        write!(f, "invalid graph: {}",
          errors.iter().map (ToString::to_string)
            .collect::<Vec <_>>().join ("; "))
      }
      Error::Workers (ref err) => write!(f, "{err}")
    }
  }
}

impl std::error::Error for Error {
  fn source (&self) -> Option <&(dyn std::error::Error + 'static)> {
    match *self {
      Error::Load    (ref err) => Some (err),
      Error::Workers (ref err) => Some (err),
      Error::Config  (_)       => None
    }
  }
}

impl From <graph::LoadError> for Error {
  fn from (err : graph::LoadError) -> Self {
    Error::Load (err)
  }
}

impl From <Vec <network::ConfigError>> for Error {
  fn from (errors : Vec <network::ConfigError>) -> Self {
    Error::Config (errors)
  }
}

impl From <network::StopError> for Error {
  fn from (err : network::StopError) -> Self {
    Error::Workers (err)
  }
}

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

/// Normalize a raw graph: merge insertion, then the iip rewrite, then
/// (optionally) the single-step harness.
pub fn normalize_graph (graph : graph::Graph, sync : bool) -> graph::Graph {
  let graph = normalize::merges (graph);
  let graph = normalize::iips (graph);
  if sync {
    normalize::sync (graph)
  } else {
    graph
  }
}

/// Run an already-normalized graph as the root network, from start to
/// EOF-driven shutdown.
///
/// # Errors
///
/// Graph validation errors before any worker starts, or the names of
/// workers that panicked.
pub fn run_graph (
  graph   : &graph::Graph,
  library : &Arc <component::Library>
) -> Result <(), Error> {
  let mut network =
    network::new (graph, library, network::ROOT_NETWORK, true)?;
  network.start();
  network.stop()?;
  Ok (())
}

/// Load a graph file, normalize it and run it to completion.
///
/// # Errors
///
/// Load, validation or worker failures; see [`Error`].
pub fn run (
  path    : &Path,
  library : &Arc <component::Library>,
  sync    : bool
) -> Result <(), Error> {
  let graph = graph::Graph::from_path (path)?;
  let graph = normalize_graph (graph, sync);
  run_graph (&graph, library)
}
