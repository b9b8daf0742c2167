//! Component registry and the elementary component set.
//!
//! A component is a plain function run inside the worker scaffold
//! (`process::Worker`). Dispatch is a single registry lookup: built-in
//! names resolve through [`Kind`], user components are registered on the
//! [`Library`] by name.

use std::collections::BTreeMap;
use std::io::{BufRead, IsTerminal, Write};
use std::str::FromStr;
use std::sync::Arc;
use serde_json::Value;
use smallvec::SmallVec;
use crate::channel;
use crate::graph::Graph;
use crate::message::Packet;
use crate::network;
use crate::process::{Core, Error, Poll, Recv};

////////////////////////////////////////////////////////////////////////////////
//  constants
////////////////////////////////////////////////////////////////////////////////

/// Pause between polling passes of non-blocking fan-in loops.
const POLL_IDLE : std::time::Duration = std::time::Duration::from_millis (1);

////////////////////////////////////////////////////////////////////////////////
//  types
////////////////////////////////////////////////////////////////////////////////

/// A component body: the business logic run inside the worker scaffold.
pub type Body = fn (&mut Core) -> Result <(), Error>;

////////////////////////////////////////////////////////////////////////////////
//  structs
////////////////////////////////////////////////////////////////////////////////

/// Registry mapping component names to bodies.
#[derive(Default)]
pub struct Library {
  custom : BTreeMap <String, Body>
}

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

/// Built-in component names.
#[derive(Clone, Copy, Debug, Eq, PartialEq,
  strum::Display, strum::EnumIter, strum::EnumString, strum::IntoStaticStr)]
pub enum Kind {
  #[strum(serialize = "_IIPs_")]
  Iips,
  #[strum(serialize = "Merge")]
  Merge,
  #[strum(serialize = "Join")]
  Join,
  #[strum(serialize = "UnBlock")]
  UnBlock,
  #[strum(serialize = "SubNet")]
  SubNet,
  #[strum(serialize = "Add")]
  Add,
  #[strum(serialize = "_StdIn_")]
  StdIn,
  #[strum(serialize = "_StdOut_")]
  StdOut,
  #[strum(serialize = "Info")]
  Info,
  #[strum(to_string = "NoOp", serialize = "_NoOp_")]
  NoOp
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl Kind {
  pub fn body (self) -> Body {
    match self {
      Kind::Iips    => iips,
      Kind::Merge   => merge,
      Kind::Join    => join,
      Kind::UnBlock => unblock,
      Kind::SubNet  => subnet,
      Kind::Add     => add,
      Kind::StdIn   => stdin,
      Kind::StdOut  => stdout,
      Kind::Info    => info,
      Kind::NoOp    => noop
    }
  }
}

impl Library {
  /// The library of built-in components.
  pub fn standard() -> Self {
    Self::default()
  }

  /// Register a user component, shadowing a built-in of the same name.
  pub fn register (&mut self, component_name : &str, body : Body) {
    self.custom.insert (component_name.to_string(), body);
  }

  /// Look up a component body by name.
  pub fn get (&self, component_name : &str) -> Option <Body> {
    self.custom.get (component_name).copied()
      .or_else (|| Kind::from_str (component_name).ok().map (Kind::body))
  }
}

////////////////////////////////////////////////////////////////////////////////
//  component bodies
////////////////////////////////////////////////////////////////////////////////

/// `Add (a, b) -> sum`: one packet from each input, their sum out.
///
/// Numbers add (integer first, falling back to floating point), strings
/// and arrays concatenate; anything else is a payload error.
fn add (core : &mut Core) -> Result <(), Error> {
  let a = core.get_data ("a")?.ok_or_end (core.name(), "a")?;
  let b = core.get_data ("b")?.ok_or_end (core.name(), "b")?;
  let sum = add_packets (core.name(), &a, &b)?;
  let _ = core.set_data ("sum", sum);
  Ok (())
}

/// `NoOp (in) -> out`: one-shot forward.
fn noop (core : &mut Core) -> Result <(), Error> {
  let data = core.get_data ("in")?.ok_or_end (core.name(), "in")?;
  let _ = core.set_data ("out", data);
  Ok (())
}

/// `Info (in) -> out`: forward every packet, logging each at info level.
fn info (core : &mut Core) -> Result <(), Error> {
  loop {
    match core.get_data ("in")? {
      Recv::Payload (data) => {
        log::info!("{data}");
        let _ = core.set_data ("out", data);
      }
      Recv::End => break
    }
  }
  Ok (())
}

/// `Merge (in[N]) -> out`: fan-in. Connections are polled in index order
/// (not fair) and any ready packet is forwarded; terminates once every
/// connection has ended.
fn merge (core : &mut Core) -> Result <(), Error> {
  let connection_count = core.len_at ("in", true);
  let mut ended = SmallVec::<[bool; 8]>::from_elem (false, connection_count);
  loop {
    let mut idle = true;
    for index in 0..connection_count {
      if ended[index] {
        continue
      }
      match core.poll_data_at (index, "in")? {
        Poll::Payload (data) => {
          idle = false;
          let _ = core.set_data ("out", data);
        }
        Poll::NotReady => {}
        Poll::End      => {
          ended[index] = true;
        }
      }
    }
    if ended.iter().all (|end| *end) {
      break
    }
    if idle {
      std::thread::sleep (POLL_IDLE);
    }
  }
  Ok (())
}

/// `Join (in[N]) -> out`: blocking read of one packet per connection,
/// emitted as an N-tuple in connection-index order; repeats until any
/// connection ends.
fn join (core : &mut Core) -> Result <(), Error> {
  let connection_count = core.len_at ("in", true);
  if connection_count == 0 {
    log::info!("process[{}] join has no connections on in-port",
      core.name());
    return Ok (())
  }
  loop {
    let mut group = Vec::with_capacity (connection_count);
    for index in 0..connection_count {
      match core.get_data_at (index, "in")? {
        Recv::Payload (data) => group.push (data),
        Recv::End => return Ok (())
      }
    }
    if core.set_data ("out", Packet::Group (group)).is_err() {
      return Ok (())
    }
  }
}

/// `UnBlock (in)`: signal the acknowledgement handle of every event found
/// in each incoming tuple.
fn unblock (core : &mut Core) -> Result <(), Error> {
  loop {
    match core.get_data ("in")? {
      Recv::Payload (packet) => {
        let elements = match packet {
          Packet::Group (elements) => elements,
          other => vec![other]
        };
        for element in elements {
          if let Packet::Event (event) = element {
            if let Some (blocker) = event.blocker {
              blocker.signal();
            }
          }
        }
      }
      Recv::End => break
    }
  }
  Ok (())
}

/// `_IIPs_`: send each configured initial information packet on the
/// out-port named after its target, `{process}_{port}`.
fn iips (core : &mut Core) -> Result <(), Error> {
  let process_name = core.name().to_string();
  let entries = core.config().get ("iips").and_then (Value::as_array)
    .cloned().unwrap_or_default();
  for entry in entries {
    let malformed = || Error::Config {
      process: process_name.clone(),
      detail:  format!("malformed iips entry: {entry}")
    };
    let items = entry.as_array()
      .filter (|items| items.len() == 3).ok_or_else (malformed)?;
    let process   = items[1].as_str().ok_or_else (malformed)?;
    let port      = items[2].as_str().ok_or_else (malformed)?;
    let port_name = format!("{process}_{port}");
    let data      = items[0].clone();
    let _ = core.set_data (&port_name, Packet::Value (data));
  }
  Ok (())
}

/// `_StdIn_ -> out`: one packet per line of standard input, trailing
/// newline stripped; EOF on the input ends the stream.
fn stdin (core : &mut Core) -> Result <(), Error> {
  let input = std::io::stdin();
  if input.is_terminal() {
    println!("hit ctrl-d to exit input stream:");
  }
  for line in input.lock().lines() {
    match line {
      Ok (line) => {
        if core.set_data ("out", Packet::Value (Value::String (line)))
          .is_err()
        {
          break
        }
      }
      Err (err) => {
        log::warn!("process[{}] standard input error: {}", core.name(), err);
        break
      }
    }
  }
  Ok (())
}

/// `_StdOut_ (in)`: write each packet followed by a newline and flush.
fn stdout (core : &mut Core) -> Result <(), Error> {
  let output = std::io::stdout();
  loop {
    match core.get_data ("in")? {
      Recv::Payload (data) => {
        let mut handle = output.lock();
        if writeln!(handle, "{data}").and_then (|()| handle.flush()).is_err()
        {
          break
        }
      }
      Recv::End => break
    }
  }
  Ok (())
}

/// `SubNet`: a process whose body is itself a network.
///
/// The child graph comes from `config.graph` (a file path, or an inline
/// graph object). The child network is named after this process and
/// bridged to it: packets arriving on this process's in-ports are
/// forwarded to the child's exported in-ports, packets leaving the
/// child's exported out-ports are forwarded to this process's out-ports.
/// A failed outbound forward marks that out-port finished. The bridge
/// exits once every port has ended, then the child network is stopped.
fn subnet (core : &mut Core) -> Result <(), Error> {
  let process_name = core.name().to_string();
  let config_error = |detail : String| Error::Config {
    process: process_name.clone(),
    detail
  };
  let child_graph : Graph = match core.config().get ("graph") {
    Some (Value::String (path)) => Graph::from_path (path)
      .map_err (|err| config_error (format!("{err}")))?,
    Some (inline) => serde_json::from_value (inline.clone())
      .map_err (|err| config_error (format!("inline graph: {err}")))?,
    None => return Err (config_error ("missing \"graph\" entry".to_string()))
  };
  let library = Arc::clone (core.library());
  let mut child = network::new (&child_graph, &library, &process_name, true)
    .map_err (|errors| config_error (
      errors.iter().map (ToString::to_string)
        .collect::<Vec <_>>().join ("; ")))?;
  child.start();
  // the child must be stopped even when the bridge fails, else it would
  // be dropped mid-run
  let bridge_result = subnet_bridge (core, &mut child);
  let stop_result   = child.stop();
  bridge_result?;
  stop_result.map_err (|err| Error::Subnet {
    process: process_name,
    detail:  format!("{err}")
  })
}

/// Forward packets between a subnet process's own ports and its child
/// network's exported interface until every port has ended.
fn subnet_bridge (core : &mut Core, child : &mut network::Network)
  -> Result <(), Error>
{
  let inport_names : Vec <String> =
    child.interface().inports.keys().cloned().collect();
  let outport_names : Vec <String> =
    child.interface().outports.keys().cloned().collect();
  let mut inports_ended  = vec![false; inport_names.len()];
  let mut outports_ended = vec![false; outport_names.len()];
  loop {
    let mut idle = true;
    for (i, name) in inport_names.iter().enumerate() {
      if inports_ended[i] {
        continue
      }
      match core.poll_data_at (0, name)? {
        Poll::Payload (packet) => {
          idle = false;
          let forwarded = child.interface().inports[name].first()
            .is_some_and (|end| end.send (packet).is_ok());
          if !forwarded {
            log::warn!("process[{}] child in-port {} is gone",
              core.name(), name);
            inports_ended[i] = true;
          }
        }
        Poll::NotReady => {}
        Poll::End => {
          for end in child.interface_mut().inports
            .get_mut (name).into_iter().flatten()
          {
            end.close();
          }
          inports_ended[i] = true;
        }
      }
    }
    for (i, name) in outport_names.iter().enumerate() {
      if outports_ended[i] {
        continue
      }
      let polled = child.interface().outports[name].first()
        .map (channel::Endpoint::try_recv);
      match polled {
        Some (Ok (packet)) => {
          idle = false;
          if core.set_data (name, packet).is_err() {
            // downstream is gone; stop forwarding this out-port
            outports_ended[i] = true;
          }
        }
        Some (Err (channel::TryRecvError::Empty)) => {}
        Some (Err (channel::TryRecvError::Disconnected)) | None => {
          for end in child.interface_mut().outports
            .get_mut (name).into_iter().flatten()
          {
            end.close();
          }
          outports_ended[i] = true;
        }
      }
    }
    if inports_ended.iter().all (|ended| *ended)
      && outports_ended.iter().all (|ended| *ended)
    {
      break
    }
    if idle {
      std::thread::sleep (POLL_IDLE);
    }
  }
  Ok (())
}

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

fn add_packets (process : &str, a : &Packet, b : &Packet)
  -> Result <Packet, Error>
{
  let payload_error = || Error::Payload {
    process: process.to_string(),
    detail:  format!("cannot add {a:?} and {b:?}")
  };
  let (Some (a), Some (b)) = (a.as_value(), b.as_value()) else {
    return Err (payload_error())
  };
  let value = match (a, b) {
    (Value::Number (x), Value::Number (y)) => {
      if let (Some (x), Some (y)) = (x.as_i64(), y.as_i64()) {
        x.checked_add (y).map (Value::from)
          .or_else (|| Some (Value::from (x as f64 + y as f64)))
      } else if let (Some (x), Some (y)) = (x.as_f64(), y.as_f64()) {
        Some (Value::from (x + y))
      } else {
        None
      }
    }
    (Value::String (x), Value::String (y)) =>
      Some (Value::String (format!("{x}{y}"))),
    (Value::Array (x), Value::Array (y)) => {
      let mut concatenated = x.clone();
      concatenated.extend (y.iter().cloned());
      Some (Value::Array (concatenated))
    }
    _ => None
  };
  value.map (Packet::Value).ok_or_else (payload_error)
}

pub fn report() {
  use strum::IntoEnumIterator;
  println!("component report...");
  print!("  built-in components:");
  for kind in Kind::iter() {
    let name : &'static str = kind.into();
    print!(" {name}");
  }
  println!();
  println!("...component report");
}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use serde_json::json;
  use super::*;

  #[test]
  fn kind_from_component_names() {
    assert_eq!(Kind::from_str ("_IIPs_"),   Ok (Kind::Iips));
    assert_eq!(Kind::from_str ("Merge"),    Ok (Kind::Merge));
    assert_eq!(Kind::from_str ("NoOp"),     Ok (Kind::NoOp));
    assert_eq!(Kind::from_str ("_NoOp_"),   Ok (Kind::NoOp));
    assert_eq!(Kind::from_str ("_StdIn_"),  Ok (Kind::StdIn));
    assert_eq!(Kind::from_str ("_StdOut_"), Ok (Kind::StdOut));
    assert!(Kind::from_str ("Bogus").is_err());
  }

  #[test]
  fn library_resolves_builtins_and_custom() {
    let mut library = Library::standard();
    assert!(library.get ("Add").is_some());
    assert!(library.get ("SubNet").is_some());
    assert!(library.get ("Custom").is_none());
    fn custom (_core : &mut Core) -> Result <(), Error> {
      Ok (())
    }
    library.register ("Custom", custom);
    assert!(library.get ("Custom").is_some());
  }

  #[test]
  fn add_packets_numbers() {
    assert_eq!(
      add_packets ("t", &Packet::value (1), &Packet::value (2)).unwrap(),
      Packet::value (3));
    assert_eq!(
      add_packets ("t", &Packet::value (0.5), &Packet::value (2)).unwrap(),
      Packet::value (2.5));
  }

  #[test]
  fn add_packets_strings_and_arrays() {
    assert_eq!(
      add_packets ("t", &Packet::value ("foo"), &Packet::value ("bar"))
        .unwrap(),
      Packet::value ("foobar"));
    assert_eq!(
      add_packets ("t",
        &Packet::Value (json!([1])), &Packet::Value (json!([2, 3])))
        .unwrap(),
      Packet::Value (json!([1, 2, 3])));
  }

  #[test]
  fn add_packets_mismatch_is_error() {
    assert!(
      add_packets ("t", &Packet::value (1), &Packet::value ("x")).is_err());
  }
}
