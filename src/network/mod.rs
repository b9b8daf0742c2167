//! Network engine.
//!
//! Materializes a normalized graph into a running network: one bounded
//! channel per connection, one worker thread per process. Termination is
//! EOF-driven: [`Network::stop`] closes the external in-ports, which
//! cascades end-of-stream through every worker until all of them drain
//! and exit; the external out-ports are closed after the join.

use std::collections::BTreeMap;
use std::sync::Arc;
use colored::Colorize;
use either::Either;
use macro_machines::def_machine_nodefault;
use serde_json::Value;
use crate::channel;
use crate::component;
use crate::graph;
use crate::message::Packet;
use crate::process;

////////////////////////////////////////////////////////////////////////////////
//  constants
////////////////////////////////////////////////////////////////////////////////

/// Parent name given to the top-level network.
pub const ROOT_NETWORK : &str = "root";

////////////////////////////////////////////////////////////////////////////////
//  structs
////////////////////////////////////////////////////////////////////////////////

//
//  struct Network
//
def_machine_nodefault! {
  Network (
    name      : String,
    workers   : Vec <process::Worker>,
    handles   : Vec <(String, std::thread::JoinHandle <()>)>,
    interface : Interface
  ) @ _network {
    STATES [
      state Ready   ()
      state Running ()
      state Ended   ()
    ]
    EVENTS [
      event Run <Ready>   => <Running> ()
      event End <Running> => <Ended>   ()
    ]
    initial_state:  Ready
    terminal_state: Ended {
      terminate_failure: {
        panic!("network dropped in state: {:?}", _network.state_id());
      }
    }
  }
}

/// Parent-side ends of a network's exported ports, named from the
/// boundary perspective: `inports` are written into the network,
/// `outports` are read out of it.
#[derive(Debug, Default)]
pub struct Interface {
  pub inports  : BTreeMap <String, Vec <channel::Sourcepoint <Packet>>>,
  pub outports : BTreeMap <String, Vec <channel::Endpoint <Packet>>>
}

/// One entry of the unified connection stream: a channel to be wired
/// from `source` to `target`. A `Left` source is a process out-port; a
/// `Right` source is an initial information packet delivered at
/// construction time.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
  pub source : Either <graph::Endpoint, Value>,
  pub target : graph::Endpoint
}

/// One or more workers panicked while the network ran.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StopError {
  pub failed : Vec <String>
}

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

/// Error in the graph detected before any worker is started.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
  UnknownComponent    { process : String, component : String },
  MissingProcess      { process : String, context : String },
  MalformedConnection { index : usize }
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl Network {
  #[inline]
  pub fn name (&self) -> &str {
    &self.as_ref().name
  }

  #[inline]
  pub fn interface (&self) -> &Interface {
    &self.as_ref().interface
  }

  #[inline]
  pub fn interface_mut (&mut self) -> &mut Interface {
    &mut self.as_mut().interface
  }

  /// Spawn every worker on its own named thread.
  pub fn start (&mut self) {
    let workers = std::mem::take (&mut self.as_mut().workers);
    let handles = workers.into_iter()
      .map (|worker| (worker.name().to_string(), worker.spawn()))
      .collect();
    self.as_mut().handles = handles;
    self.handle_event (EventParams::Run{}.into()).unwrap();
    log::debug!("network[{}]: {}", self.name(), "started...".cyan().bold());
  }

  /// Tear the network down: close every external in-port end (signalling
  /// end-of-stream upstream into the network), join every worker, then
  /// close every external out-port end.
  ///
  /// # Errors
  ///
  /// Collects the names of workers that panicked instead of exiting.
  pub fn stop (&mut self) -> Result <(), StopError> {
    self.as_mut().interface.close_inports();
    let mut failed = Vec::new();
    for (worker_name, handle) in self.as_mut().handles.drain (..) {
      if handle.join().is_err() {
        failed.push (worker_name);
      }
    }
    self.as_mut().interface.close_outports();
    self.handle_event (EventParams::End{}.into()).unwrap();
    log::debug!("network[{}]: {}", self.name(), "...finished".cyan().bold());
    if failed.is_empty() {
      Ok (())
    } else {
      for worker_name in &failed {
        log::warn!("network[{}] worker[{}]: {}", self.name(), worker_name,
          "terminated by panic".red().bold());
      }
      Err (StopError { failed })
    }
  }
}

impl Interface {
  pub fn close_inports (&mut self) {
    for ends in self.inports.values_mut() {
      for end in ends.iter_mut() {
        end.close();
      }
    }
  }

  pub fn close_outports (&mut self) {
    for ends in self.outports.values_mut() {
      for end in ends.iter_mut() {
        end.close();
      }
    }
  }

  /// True iff every end of every exported port is closed.
  pub fn is_closed (&self) -> bool {
    self.inports.values().flatten().all (channel::Sourcepoint::is_closed)
      && self.outports.values().flatten().all (channel::Endpoint::is_closed)
  }
}

impl std::fmt::Display for ConfigError {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      ConfigError::UnknownComponent { ref process, ref component } =>
        write!(f, "process \"{process}\": unknown component \
          \"{component}\""),
      ConfigError::MissingProcess { ref process, ref context } =>
        write!(f, "{context} references missing process \"{process}\""),
      ConfigError::MalformedConnection { index } =>
        write!(f, "connection {index} has neither source nor data")
    }
  }
}

impl std::error::Error for ConfigError {}

impl std::fmt::Display for StopError {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "worker(s) panicked: {}", self.failed.join (", "))
  }
}

impl std::error::Error for StopError {}

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

/// The internal connections of a graph, in order; packet-carrying
/// entries are included (as `Right` sources) iff `iips` is true.
pub fn connection_iter <'a> (graph : &'a graph::Graph, iips : bool)
  -> impl Iterator <Item = Link> + 'a
{
  graph.connections.iter().filter_map (move |connection| {
    match (&connection.src, &connection.data) {
      (Some (src), _) => Some (Link {
        source: Either::Left (src.clone()),
        target: connection.tgt.clone()
      }),
      (None, Some (data)) if iips => Some (Link {
        source: Either::Right (data.clone()),
        target: connection.tgt.clone()
      }),
      _ => None
    }
  })
}

/// The exported ports of a graph as connections touching the parent
/// pseudo-process: exported in-ports with `(parent, external)` as the
/// source, then exported out-ports with it as the target.
pub fn export_iter <'a> (graph : &'a graph::Graph, parent_name : &str)
  -> impl Iterator <Item = Link> + 'a
{
  let parent = parent_name.to_string();
  let inports = {
    let parent = parent.clone();
    graph.inports.iter().map (move |(external_name, internal)| Link {
      source: Either::Left (graph::Endpoint::new (&parent, external_name)),
      target: internal.clone()
    })
  };
  let outports = graph.outports.iter().map (move |(external_name, internal)|
    Link {
      source: Either::Left (internal.clone()),
      target: graph::Endpoint::new (&parent, external_name)
    });
  inports.chain (outports)
}

/// Check the graph against the component library: every referenced
/// process must exist and every component must resolve.
///
/// # Errors
///
/// All violations are collected before any worker exists.
pub fn validate (graph : &graph::Graph, library : &component::Library)
  -> Result <(), Vec <ConfigError>>
{
  let mut errors = Vec::new();
  let check_process = |process_name : &str, context : String,
    errors : &mut Vec <ConfigError>|
  {
    if !graph.processes.contains_key (process_name) {
      errors.push (ConfigError::MissingProcess {
        process: process_name.to_string(),
        context
      });
    }
  };
  for (process_name, process) in &graph.processes {
    if library.get (&process.component).is_none() {
      errors.push (ConfigError::UnknownComponent {
        process:   process_name.clone(),
        component: process.component.clone()
      });
    }
  }
  for (index, connection) in graph.connections.iter().enumerate() {
    match (&connection.src, &connection.data) {
      (None, None) => {
        errors.push (ConfigError::MalformedConnection { index });
        continue
      }
      (Some (src), _) => {
        check_process (&src.process,
          format!("connection {index} source"), &mut errors);
      }
      _ => {}
    }
    check_process (&connection.tgt.process,
      format!("connection {index} target"), &mut errors);
  }
  for (external_name, internal) in &graph.inports {
    check_process (&internal.process,
      format!("exported in-port \"{external_name}\""), &mut errors);
  }
  for (external_name, internal) in &graph.outports {
    check_process (&internal.process,
      format!("exported out-port \"{external_name}\""), &mut errors);
  }
  if !errors.is_empty() {
    Err (errors)
  } else {
    Ok (())
  }
}

/// Materialize a graph into an unstarted network.
///
/// One bounded channel is created per connection in the unified stream
/// (internal connections, packets if `apply_iips`, exported ports); each
/// producer end is handed to the source process's out-port table (or to
/// the interface for exported in-ports) and each consumer end to the
/// target's in-port table (or the interface for exported out-ports).
/// Initial information packets are sent synchronously here, before any
/// worker runs, so they precede anything arriving through an exported
/// in-port.
///
/// # Errors
///
/// Graph validation errors, collected before any channel or worker is
/// created.
pub fn new (
  graph       : &graph::Graph,
  library     : &Arc <component::Library>,
  parent_name : &str,
  apply_iips  : bool
) -> Result <Network, Vec <ConfigError>> {
  #[derive(Default)]
  struct Table {
    inports  : BTreeMap <String, Vec <channel::Endpoint <Packet>>>,
    outports : BTreeMap <String, Vec <channel::Sourcepoint <Packet>>>
  }
  validate (graph, library)?;
  let mut tables : BTreeMap <String, Table> = graph.processes.keys()
    .map (|process_name| (process_name.clone(), Table::default()))
    .collect();
  let mut interface = Interface::default();
  for link in connection_iter (graph, apply_iips)
    .chain (export_iter (graph, parent_name))
  {
    let (sourcepoint, endpoint) =
      channel::channel (channel::DEFAULT_CAPACITY);
    match link.source {
      Either::Left (src) => {
        log::debug!("PIPE: {}.{} -> {}.{}", src.process, src.port,
          link.target.process, link.target.port);
        if src.process == parent_name {
          interface.inports.entry (src.port).or_default()
            .push (sourcepoint);
        } else {
          tables.get_mut (&src.process).expect ("source was validated")
            .outports.entry (src.port).or_default().push (sourcepoint);
        }
      }
      Either::Right (data) => {
        log::debug!("IIP : {:?} = {}.{}", data,
          link.target.process, link.target.port);
        sourcepoint.send (Packet::Value (data))
          .expect ("iip send on a fresh channel");
        // the producer end drops here: the packet is buffered and the
        // consumer observes eof after reading it
      }
    }
    if link.target.process == parent_name {
      interface.outports.entry (link.target.port).or_default()
        .push (endpoint);
    } else {
      tables.get_mut (&link.target.process).expect ("target was validated")
        .inports.entry (link.target.port).or_default().push (endpoint);
    }
  }
  let mut workers = Vec::with_capacity (graph.processes.len());
  for (process_name, process) in &graph.processes {
    log::debug!("PROC: {}", process_name);
    let body = library.get (&process.component)
      .expect ("component was validated");
    let table  = tables.remove (process_name).unwrap_or_default();
    let config = process.metadata.as_ref()
      .map (|metadata| metadata.config.clone()).unwrap_or (Value::Null);
    let block_cfg = config.get ("blocking").and_then (Value::as_object)
      .map (|entries| entries.iter()
        .map (|(kind, enabled)| (
          kind.clone(), enabled.as_bool().unwrap_or (false)))
        .collect())
      .unwrap_or_default();
    let core = process::Core::new (
      process_name.clone(), config, block_cfg, Arc::clone (library),
      table.inports, table.outports);
    workers.push (process::Worker::new (core, body));
  }
  Ok (Network::new (ExtendedState::new (
    Some (parent_name.to_string()),
    Some (workers),
    Some (Vec::new()),
    Some (interface)
  ).unwrap()))
}

pub fn report_sizes() {
  println!("network report sizes...");
  println!("  size of Network: {}",   std::mem::size_of::<Network>());
  println!("  size of Interface: {}", std::mem::size_of::<Interface>());
  println!("...network report sizes");
}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use serde_json::json;
  use super::*;

  fn library() -> Arc <component::Library> {
    Arc::new (component::Library::standard())
  }

  /// A chain of wired connections and a run of leading iips.
  fn chain (connection_count : usize, iip_count : usize) -> graph::Graph {
    let mut graph = graph::Graph::new();
    for i in 0..=connection_count.max (iip_count) {
      graph.add_process (&format!("proc{i}"), "NoOp");
    }
    for i in 0..connection_count {
      let src = format!("proc{i}");
      let tgt = format!("proc{}", i + 1);
      graph.add_connection (src.as_str(), tgt.as_str());
    }
    for i in 0..iip_count {
      let tgt = format!("proc{i}");
      graph.add_iip (json!(i), tgt.as_str());
    }
    graph
  }

  #[test]
  fn connection_iter_counts() {
    for (connection_count, iip_count) in [(8, 4), (0, 4), (8, 0)] {
      let graph = chain (connection_count, iip_count);
      let links : Vec <Link> =
        connection_iter (&graph, true).collect();
      assert_eq!(links.len(), connection_count + iip_count);
      let data_count = links.iter()
        .filter (|link| link.source.is_right()).count();
      assert_eq!(data_count, iip_count);
      // iips excluded when disabled
      assert_eq!(
        connection_iter (&graph, false).count(), connection_count);
    }
  }

  #[test]
  fn export_iter_counts() {
    let mut graph = graph::Graph::new();
    let inport_count  = 8;
    let outport_count = 4;
    for i in 0..inport_count.max (outport_count) {
      graph.add_process (&format!("proc{i}"), "NoOp");
    }
    for i in 0..inport_count {
      graph.add_export (&format!("IN{i}"),
        graph::Endpoint::new (&format!("proc{i}"), "in"), true);
    }
    for i in 0..outport_count {
      graph.add_export (&format!("OUT{i}"),
        graph::Endpoint::new (&format!("proc{i}"), "out"), false);
    }
    let links : Vec <Link> = export_iter (&graph, "foo").collect();
    assert_eq!(links.len(), inport_count + outport_count);
    let source_is_parent = links.iter()
      .filter (|link| matches!(link.source,
        Either::Left (ref src) if src.process == "foo"))
      .count();
    let target_is_parent = links.iter()
      .filter (|link| link.target.process == "foo").count();
    assert_eq!(source_is_parent, inport_count);
    assert_eq!(target_is_parent, outport_count);
    assert!(links.iter().all (|link| link.source.is_left()));
  }

  #[test]
  fn validate_unknown_component() {
    let mut graph = graph::Graph::new();
    graph.add_process ("mystery", "Bogus");
    assert_eq!(
      validate (&graph, &library()),
      Err (vec![ConfigError::UnknownComponent {
        process:   "mystery".to_string(),
        component: "Bogus".to_string()
      }]));
  }

  #[test]
  fn validate_missing_process() {
    let mut graph = graph::Graph::new();
    graph.add_process ("noop1", "NoOp");
    graph.add_connection ("noop1", "ghost");
    let errors = validate (&graph, &library()).unwrap_err();
    assert_eq!(errors, vec![ConfigError::MissingProcess {
      process: "ghost".to_string(),
      context: "connection 0 target".to_string()
    }]);
  }

  #[test]
  fn zero_process_network_lifecycle() {
    let graph = graph::Graph::new();
    let mut network =
      new (&graph, &library(), ROOT_NETWORK, true).unwrap();
    network.start();
    network.stop().unwrap();
    assert!(network.interface().is_closed());
  }

  #[test]
  fn five_parallel_processes_with_interface() {
    let mut graph = graph::Graph::new();
    for i in 0..5 {
      let name = format!("proc{i}");
      graph.add_process (&name, "NoOp");
      graph.add_export (&format!("IN{i}"),
        graph::Endpoint::new (&name, "in"), true);
      graph.add_export (&format!("OUT{i}"),
        graph::Endpoint::new (&name, "out"), false);
    }
    let mut network =
      new (&graph, &library(), "networkName", false).unwrap();
    assert_eq!(network.name(), "networkName");
    assert!(!network.interface().is_closed());
    // kick the network before starting it: sends are buffered
    for i in 0..5 {
      network.interface().inports[&format!("IN{i}")][0]
        .send (Packet::value (i)).unwrap();
    }
    network.start();
    for i in 0..5 {
      let received = network.interface().outports[&format!("OUT{i}")][0]
        .recv().unwrap();
      assert_eq!(received, Packet::value (i));
    }
    network.stop().unwrap();
    // closure completeness at the boundary
    assert!(network.interface().is_closed());
  }

  #[test]
  fn iips_are_delivered_at_construction() {
    let mut graph = graph::Graph::new();
    graph.add_process ("noop1", "NoOp");
    graph.add_iip (json!("seed"), "noop1");
    graph.add_export ("OUT", graph::Endpoint::new ("noop1", "out"), false);
    let mut network = new (&graph, &library(), ROOT_NETWORK, true).unwrap();
    network.start();
    assert_eq!(
      network.interface().outports["OUT"][0].recv().unwrap(),
      Packet::value ("seed"));
    // one-shot: after the forward the worker exits and eof follows
    assert!(network.interface().outports["OUT"][0].recv().is_err());
    network.stop().unwrap();
  }
}
