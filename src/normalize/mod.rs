//! Graph normalizers.
//!
//! Three rewrites turn a declarative graph into its executable form:
//!
//! - [`merges`] inserts a `Merge` node wherever an initial information
//!   packet and an exported in-port would collide on the same internal
//!   in-port;
//! - [`iips`] replaces packet-carrying connection entries with a single
//!   synthesized `_IIPs_` process wired to every packet target;
//! - [`sync`] splices in the single-step harness driven by standard
//!   input.
//!
//! They are applied in that order: merge insertion must see the packets
//! while they are still connection entries.

use std::collections::{BTreeMap, BTreeSet};
use serde_json::{json, Value};
use crate::component::Kind;
use crate::graph::{Connection, Endpoint, Graph};
use crate::process::EVENTS_PORT;

////////////////////////////////////////////////////////////////////////////////
//  constants
////////////////////////////////////////////////////////////////////////////////

/// Name of the synthesized process that delivers initial information
/// packets.
pub const IIPS_PROCESS : &str = "*iips*";

/// Names of the processes spliced in by the single-step harness.
pub const EVENTS_PROCESS  : &str = "*events*";
pub const STDIN_PROCESS   : &str = "*stdin*";
pub const SYNC_PROCESS    : &str = "*sync*";
pub const UNBLOCK_PROCESS : &str = "*unblock*";

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

/// Rewrite packet-carrying connection entries into a synthesized
/// `*iips*` process.
///
/// Each removed entry becomes a triple `[data, process, port]` in the
/// `*iips*` process's `config.iips` list (in original connection order)
/// together with a connection from the out-port named
/// `{process}_{port}` to the packet's target. A graph with no packet
/// entries is returned unchanged; the rewrite is idempotent.
pub fn iips (mut graph : Graph) -> Graph {
  let mut triples = Vec::new();
  let mut kept    = Vec::with_capacity (graph.connections.len());
  for connection in std::mem::take (&mut graph.connections) {
    match connection {
      Connection { src: None, data: Some (data), tgt } => {
        triples.push ((data, tgt.process, tgt.port));
      }
      other => kept.push (other)
    }
  }
  graph.connections = kept;
  if triples.is_empty() {
    return graph
  }
  let iips_component : &'static str = Kind::Iips.into();
  let mut edits = Graph::new();
  edits.add_process (IIPS_PROCESS, iips_component);
  for (_, process, port) in &triples {
    let source_port = format!("{process}_{port}");
    edits.add_connection (
      (IIPS_PROCESS, source_port.as_str()),
      (process.as_str(), port.as_str()));
  }
  let entries : Vec <Value> = triples.into_iter()
    .map (|(data, process, port)| json!([data, process, port]))
    .collect();
  edits.set_config (IIPS_PROCESS, json!({ "iips": entries }))
    .expect ("process was just added");
  graph.modify (edits);
  graph
}

/// Insert a `Merge` node wherever an initial information packet targets
/// an in-port that an exported in-port also targets.
///
/// The packet and the exported in-port are both rewired into the merge
/// node's `in` port and the merge's `out` feeds the original target; a
/// second packet aimed at the same target joins the existing merge
/// node's fan-in. A packet sharing an in-port with an ordinary wired
/// connection is left alone: both packets will be delivered, which is
/// logged as an advisory.
pub fn merges (mut graph : Graph) -> Graph {
  let exported : BTreeMap <(String, String), String> = graph.inports.iter()
    .map (|(external, internal)| (
      (internal.process.clone(), internal.port.clone()), external.clone()))
    .collect();
  let wired : BTreeSet <(String, String)> = graph.connections.iter()
    .filter (|connection| connection.src.is_some())
    .map (|connection| (
      connection.tgt.process.clone(), connection.tgt.port.clone()))
    .collect();
  let merge_component : &'static str = Kind::Merge.into();
  let mut inserted : BTreeMap <(String, String), String> = BTreeMap::new();
  let mut edits = Graph::new();
  for connection in &mut graph.connections {
    if connection.src.is_some() || connection.data.is_none() {
      continue
    }
    let target = (connection.tgt.process.clone(), connection.tgt.port.clone());
    let Some (external) = exported.get (&target) else {
      if wired.contains (&target) {
        log::info!(
          "iip and wired connection share in-port {}.{}; \
            both packets will be delivered",
          target.0, target.1);
      }
      continue
    };
    let next_index = inserted.len() + 1;
    let merge_name = inserted.entry (target.clone()).or_insert_with (|| {
      let merge_name = format!("*merge{next_index}*");
      edits.add_process (&merge_name, merge_component);
      edits.add_connection (
        (merge_name.as_str(), "out"),
        (target.0.as_str(), target.1.as_str()));
      graph.inports.insert (
        external.clone(), Endpoint::new (&merge_name, "in"));
      merge_name
    });
    connection.tgt = Endpoint::new (merge_name, "in");
  }
  graph.modify (edits);
  graph
}

/// Splice in the single-step harness: every process reports
/// `ReceivedAllInputs` as a blocking event into a `*events*` merge, which
/// is joined with lines from `*stdin*`; `*unblock*` acknowledges one
/// waiting process per line of standard input.
pub fn sync (mut graph : Graph) -> Graph {
  let process_names : Vec <String> = graph.processes.keys().cloned().collect();
  let mut edits = Graph::new();
  let merge_component   : &'static str = Kind::Merge.into();
  let stdin_component   : &'static str = Kind::StdIn.into();
  let join_component    : &'static str = Kind::Join.into();
  let unblock_component : &'static str = Kind::UnBlock.into();
  edits.add_process (EVENTS_PROCESS,  merge_component);
  edits.add_process (STDIN_PROCESS,   stdin_component);
  edits.add_process (SYNC_PROCESS,    join_component);
  edits.add_process (UNBLOCK_PROCESS, unblock_component);
  for process_name in &process_names {
    graph.set_config (process_name,
      json!({ "blocking": { "ReceivedAllInputs": true } }))
      .expect ("iterating existing processes");
    edits.add_connection (
      (process_name.as_str(), EVENTS_PORT), EVENTS_PROCESS);
  }
  edits.add_connection (EVENTS_PROCESS, SYNC_PROCESS);
  edits.add_connection (STDIN_PROCESS,  SYNC_PROCESS);
  edits.add_connection (SYNC_PROCESS,   UNBLOCK_PROCESS);
  graph.modify (edits);
  graph
}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  /// Three adders and an info sink, as wired by the add-tree example.
  fn add_tree() -> Graph {
    let mut graph = Graph::new();
    for name in ["add1", "add2", "add3"] {
      graph.add_process (name, "Add");
    }
    graph.add_process ("info", "Info");
    graph.add_connection (("add1", "sum"), ("add3", "a"));
    graph.add_connection (("add2", "sum"), ("add3", "b"));
    graph.add_connection (("add3", "sum"), "info");
    graph.add_iip (json!(1), ("add1", "a"));
    graph.add_iip (json!(2), ("add1", "b"));
    graph.add_iip (json!(3), ("add2", "a"));
    graph.add_iip (json!(4), ("add2", "b"));
    graph
  }

  #[test]
  fn iips_rewrites_packet_connections() {
    let graph = iips (add_tree());
    assert!(graph.processes.contains_key (IIPS_PROCESS));
    assert_eq!(graph.processes[IIPS_PROCESS].component, "_IIPs_");
    // 3 wired + 4 rewritten iip connections, none carrying data
    assert_eq!(graph.connections.len(), 7);
    assert!(graph.connections.iter().all (|c| !c.is_iip()));
    // config triples are in original connection order
    assert_eq!(
      *graph.config_of (IIPS_PROCESS).unwrap(),
      json!({ "iips": [
        [1, "add1", "a"], [2, "add1", "b"],
        [3, "add2", "a"], [4, "add2", "b"] ] }));
    // each triple got a connection from its named out-port
    assert!(graph.connections.iter().any (|c|
      c.src.as_ref().is_some_and (|src|
        src.process == IIPS_PROCESS && src.port == "add1_a")
      && c.tgt == Endpoint::new ("add1", "a")));
  }

  #[test]
  fn iips_without_packets_is_identity() {
    let mut graph = Graph::new();
    graph.add_process ("noop1", "NoOp");
    graph.add_process ("noop2", "NoOp");
    graph.add_connection ("noop1", "noop2");
    let before = graph.clone();
    assert_eq!(iips (graph), before);
  }

  #[test]
  fn iips_is_idempotent() {
    let once  = iips (add_tree());
    let twice = iips (once.clone());
    assert_eq!(once, twice);
  }

  #[test]
  fn merges_inserts_node_on_exported_collision() {
    let mut graph = Graph::new();
    graph.add_process ("noop3", "NoOp");
    graph.add_process ("noop4", "NoOp");
    graph.add_connection ("noop3", "noop4");
    graph.add_iip (json!("seed"), "noop3");
    graph.add_export ("IN",  Endpoint::new ("noop3", "in"),  true);
    graph.add_export ("OUT", Endpoint::new ("noop4", "out"), false);
    let graph = merges (graph);
    // the merge node is between the packet/export pair and noop3
    assert_eq!(graph.processes["*merge1*"].component, "Merge");
    assert_eq!(graph.inports["IN"], Endpoint::new ("*merge1*", "in"));
    let iip = graph.connections.iter().find (|c| c.is_iip()).unwrap();
    assert_eq!(iip.tgt, Endpoint::new ("*merge1*", "in"));
    assert!(graph.connections.iter().any (|c|
      c.src.as_ref().is_some_and (|src|
        src.process == "*merge1*" && src.port == "out")
      && c.tgt == Endpoint::new ("noop3", "in")));
  }

  #[test]
  fn merges_routes_second_packet_into_same_node() {
    let mut graph = Graph::new();
    graph.add_process ("noop1", "NoOp");
    graph.add_iip (json!(1), "noop1");
    graph.add_iip (json!(2), "noop1");
    graph.add_export ("IN", Endpoint::new ("noop1", "in"), true);
    let graph = merges (graph);
    assert!(graph.processes.contains_key ("*merge1*"));
    assert!(!graph.processes.contains_key ("*merge2*"));
    assert!(graph.connections.iter().filter (|c| c.is_iip())
      .all (|c| c.tgt == Endpoint::new ("*merge1*", "in")));
  }

  #[test]
  fn merges_leaves_plain_fan_in_alone() {
    let mut graph = Graph::new();
    graph.add_process ("noop1", "NoOp");
    graph.add_process ("noop2", "NoOp");
    graph.add_connection ("noop1", "noop2");
    graph.add_iip (json!(1), "noop2");
    let before = graph.clone();
    assert_eq!(merges (graph), before);
  }

  #[test]
  fn sync_splices_harness() {
    let graph = sync (add_tree());
    // four original processes plus the four harness processes
    assert_eq!(graph.processes.len(), 8);
    for (name, component) in [
      (EVENTS_PROCESS,  "Merge"),
      (STDIN_PROCESS,   "_StdIn_"),
      (SYNC_PROCESS,    "Join"),
      (UNBLOCK_PROCESS, "UnBlock")]
    {
      assert_eq!(graph.processes[name].component, component);
    }
    // every original process reports blocking events into *events*
    for name in ["add1", "add2", "add3", "info"] {
      assert_eq!(
        *graph.config_of (name).unwrap(),
        json!({ "blocking": { "ReceivedAllInputs": true } }));
      assert!(graph.connections.iter().any (|c|
        c.src.as_ref().is_some_and (|src|
          src.process == name && src.port == EVENTS_PORT)
        && c.tgt == Endpoint::new (EVENTS_PROCESS, "in")));
    }
    // the harness processes themselves are not instrumented
    assert!(graph.config_of (EVENTS_PROCESS).is_none());
    // *events* and *stdin* are joined, the join feeds *unblock*
    for (src, tgt) in [
      (EVENTS_PROCESS, SYNC_PROCESS),
      (STDIN_PROCESS,  SYNC_PROCESS),
      (SYNC_PROCESS,   UNBLOCK_PROCESS)]
    {
      assert!(graph.connections.iter().any (|c|
        c.src.as_ref().is_some_and (|s|
          s.process == src && s.port == "out")
        && c.tgt == Endpoint::new (tgt, "in")));
    }
  }
}
