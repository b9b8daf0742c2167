//! Worker runtime.
//!
//! Every component body runs inside the scaffold implemented here. The
//! [`Core`] is the body's handle to the outside world: named in-ports and
//! out-ports (each a sequence of channel connections), the component
//! config, and internal event emission. The scaffold owns the lifecycle:
//! emit `ReceivedAllInputs` once every declared in-port has produced a
//! payload, run the body, drain remaining input to end-of-stream, then
//! close every held channel end so EOF cascades downstream.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use colored::Colorize;
use serde_json::Value;
use crate::channel;
use crate::component;
use crate::message::{self, Event, Packet};

////////////////////////////////////////////////////////////////////////////////
//  constants
////////////////////////////////////////////////////////////////////////////////

/// Reserved out-port for internal lifecycle events.
pub const EVENTS_PORT : &str = "events";

const FIRST_CONNECTION : usize = 0;

////////////////////////////////////////////////////////////////////////////////
//  structs
////////////////////////////////////////////////////////////////////////////////

/// A component body's handle to its port table and runtime services.
pub struct Core {
  name           : String,
  config         : Value,
  block_cfg      : BTreeMap <String, bool>,
  library        : Arc <component::Library>,
  inports        : BTreeMap <String, Vec <channel::Endpoint <Packet>>>,
  outports       : BTreeMap <String, Vec <channel::Sourcepoint <Packet>>>,
  send_counts    : BTreeMap <String, usize>,
  received       : BTreeSet <String>,
  has_all_inputs : bool
}

/// One process of a running network: a component body bound to its core.
pub struct Worker {
  core : Core,
  body : component::Body
}

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

/// Result of a blocking receive on an in-port connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Recv {
  Payload (Packet),
  /// End-of-stream: the producer end is closed and drained.
  End
}

/// Result of a non-blocking receive probe on an in-port connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Poll {
  Payload (Packet),
  /// Nothing buffered; the producer end is still open.
  NotReady,
  /// End-of-stream: the producer end is closed and drained.
  End
}

/// Worker failure raised from a component body. The scaffold logs the
/// failure, closes the worker's channel ends and exits; end-of-stream
/// then propagates naturally downstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
  /// A required input ended before the body received its packet.
  EndOfStream       { process : String, port : String },
  /// The body addressed an in-port connection that does not exist.
  UnconnectedInport { process : String, port : String },
  /// The body could not interpret a payload.
  Payload           { process : String, detail : String },
  /// The component configuration is unusable.
  Config            { process : String, detail : String },
  /// A child network failed.
  Subnet            { process : String, detail : String }
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl Core {
  pub (crate) fn new (
    name      : String,
    config    : Value,
    block_cfg : BTreeMap <String, bool>,
    library   : Arc <component::Library>,
    inports   : BTreeMap <String, Vec <channel::Endpoint <Packet>>>,
    outports  : BTreeMap <String, Vec <channel::Sourcepoint <Packet>>>
  ) -> Self {
    Core {
      name, config, block_cfg, library, inports, outports,
      send_counts:    BTreeMap::new(),
      received:       BTreeSet::new(),
      has_all_inputs: false
    }
  }

  #[inline]
  pub fn name (&self) -> &str {
    &self.name
  }

  /// The component's config block (`metadata.config` in the graph).
  #[inline]
  pub fn config (&self) -> &Value {
    &self.config
  }

  /// The component library the owning network was built from; used by
  /// composite components to construct child networks.
  #[inline]
  pub fn library (&self) -> &Arc <component::Library> {
    &self.library
  }

  /// Number of connections on the named port.
  pub fn len_at (&self, port_name : &str, inport : bool) -> usize {
    if inport {
      self.inports.get (port_name).map_or (0, Vec::len)
    } else {
      self.outports.get (port_name).map_or (0, Vec::len)
    }
  }

  /// Receive one packet from the first connection of the named in-port.
  ///
  /// If the in-port has multiple connections the first is used and an
  /// advisory is logged.
  ///
  /// # Errors
  ///
  /// The in-port must have at least one connection.
  pub fn get_data (&mut self, port_name : &str) -> Result <Recv, Error> {
    let connection_count = self.len_at (port_name, true);
    if 1 < connection_count {
      log::info!(
        "in-port {}.{} has {} connections, but only one requested",
        self.name, port_name, connection_count);
    }
    self.get_data_at (FIRST_CONNECTION, port_name)
  }

  /// Receive one packet from the i-th connection of the named in-port,
  /// blocking until a packet or end-of-stream arrives.
  ///
  /// # Errors
  ///
  /// The connection must exist.
  pub fn get_data_at (&mut self, index : usize, port_name : &str)
    -> Result <Recv, Error>
  {
    let result = self.connection_at (index, port_name)?.recv();
    match result {
      Ok (packet) => {
        log::debug!("RECV: {}.{} = {}", self.name, port_name,
          format!("{packet:?}").green().bold());
        self.mark_received (port_name);
        Ok (Recv::Payload (packet))
      }
      Err (channel::RecvError) => Ok (Recv::End)
    }
  }

  /// Probe the i-th connection of the named in-port without blocking.
  ///
  /// # Errors
  ///
  /// The connection must exist.
  pub fn poll_data_at (&mut self, index : usize, port_name : &str)
    -> Result <Poll, Error>
  {
    let result = self.connection_at (index, port_name)?.try_recv();
    match result {
      Ok (packet) => {
        log::debug!("RECV: {}.{} = {}", self.name, port_name,
          format!("{packet:?}").green().bold());
        self.mark_received (port_name);
        Ok (Poll::Payload (packet))
      }
      Err (channel::TryRecvError::Empty)        => Ok (Poll::NotReady),
      Err (channel::TryRecvError::Disconnected) => Ok (Poll::End)
    }
  }

  /// Send a packet on the named out-port.
  ///
  /// With N outgoing connections on the port, the k-th call routes to
  /// connection `k mod N` (round-robin load balance). Sending to an
  /// unconnected out-port is a no-op with an advisory log.
  ///
  /// # Errors
  ///
  /// A send error means the receiving end is gone; the packet is
  /// returned and the component should stop emitting on this out-port.
  pub fn set_data (&mut self, port_name : &str, packet : Packet)
    -> Result <(), channel::SendError <Packet>>
  {
    let connections = match self.outports.get (port_name) {
      Some (connections) if !connections.is_empty() => connections,
      _ => {
        log::info!("data ({:?}) sent to unconnected port: {}.{}",
          packet, self.name, port_name);
        return Ok (())
      }
    };
    log::debug!("SEND: {}.{} = {}", self.name, port_name,
      format!("{packet:?}").blue().bold());
    let count = self.send_counts.entry (port_name.to_string()).or_insert (0);
    let index = *count % connections.len();
    *count += 1;
    connections[index].send (packet).map_err (|send_error| {
      log::warn!("process[{}] send on out-port {} failed: {}",
        self.name, port_name, "receiver disconnected".red().bold());
      send_error
    })
  }

  //
  //  private
  //

  fn connection_at (&self, index : usize, port_name : &str)
    -> Result <&channel::Endpoint <Packet>, Error>
  {
    self.inports.get (port_name).and_then (|conns| conns.get (index))
      .ok_or_else (|| {
        log::info!("data requested from an unconnected port: {}.{}",
          self.name, port_name);
        Error::UnconnectedInport {
          process: self.name.clone(),
          port:    port_name.to_string()
        }
      })
  }

  fn mark_received (&mut self, port_name : &str) {
    self.received.insert (port_name.to_string());
    self.check_inputs();
  }

  /// Emit `ReceivedAllInputs` the first time the received set covers
  /// every declared in-port; immediately satisfied when there are none.
  fn check_inputs (&mut self) {
    if self.has_all_inputs {
      return
    }
    if self.inports.keys().all (|port_name| self.received.contains (port_name))
    {
      self.has_all_inputs = true;
      self.internal_event (message::RECEIVED_ALL_INPUTS);
    }
  }

  /// Emit an internal event on the reserved `events` out-port. When the
  /// blocking config enables this event kind, attach a fresh
  /// acknowledgement handle and wait on it after sending. An unconnected
  /// `events` out-port suppresses the event.
  fn internal_event (&mut self, kind : &str) {
    if self.len_at (EVENTS_PORT, false) == 0 {
      log::info!("process[{}] events disabled: {} not sent", self.name, kind);
      return
    }
    let mut event = Event::new (&self.name, kind);
    let blocking  = self.block_cfg.get (kind).copied().unwrap_or (false);
    if blocking {
      let (handle, wait) = message::ack_pair();
      event.blocker = Some (handle);
      if self.set_data (EVENTS_PORT, Packet::Event (event)).is_ok() {
        log::debug!("process[{}] waiting on {} acknowledgement",
          self.name, kind);
        wait.wait();
        log::debug!("process[{}] {}", self.name, "unblocked".cyan().bold());
      }
    } else {
      let _ = self.set_data (EVENTS_PORT, Packet::Event (event));
    }
  }

  /// Receive every in-port connection to end-of-stream so upstream
  /// workers can close cleanly; returns the number of packets observed.
  fn drain (&mut self) -> usize {
    let port_names : Vec <String> = self.inports.keys().cloned().collect();
    log::debug!("WAIT: waiting on {}'s in-ports {:?} to close...",
      self.name, port_names);
    let mut unhandled = 0;
    for port_name in &port_names {
      let connection_count = self.len_at (port_name, true);
      for index in 0..connection_count {
        loop {
          match self.get_data_at (index, port_name) {
            Ok (Recv::Payload (packet)) => {
              log::warn!("process[{}] unhandled packet on in-port {}: {}",
                self.name, port_name,
                format!("{packet:?}").yellow().bold());
              unhandled += 1;
            }
            Ok (Recv::End) | Err (_) => break
          }
        }
      }
    }
    log::debug!("WAIT: done waiting! process {} is shutting down", self.name);
    unhandled
  }

  /// Close every channel end held by this worker, the reserved `events`
  /// out-port included.
  fn close_all (&mut self) {
    for (port_name, connections) in &mut self.inports {
      for connection in connections.iter_mut() {
        connection.close();
      }
      log::debug!("CONN: on exit, process \"{}\" closed in-port \"{}\"",
        self.name, port_name);
    }
    for (port_name, connections) in &mut self.outports {
      for connection in connections.iter_mut() {
        connection.close();
      }
      log::debug!("CONN: on exit, process \"{}\" closed out-port \"{}\"",
        self.name, port_name);
    }
  }
}

impl Recv {
  /// Unwrap a payload, treating end-of-stream on a required input as a
  /// worker failure.
  ///
  /// # Errors
  ///
  /// `EndOfStream` when the connection ended.
  pub fn ok_or_end (self, process : &str, port : &str)
    -> Result <Packet, Error>
  {
    match self {
      Recv::Payload (packet) => Ok (packet),
      Recv::End => Err (Error::EndOfStream {
        process: process.to_string(),
        port:    port.to_string()
      })
    }
  }
}

impl Worker {
  pub (crate) fn new (core : Core, body : component::Body) -> Self {
    Worker { core, body }
  }

  #[inline]
  pub fn name (&self) -> &str {
    self.core.name()
  }

  /// Run the scaffold lifecycle to completion.
  pub fn run (mut self) {
    log::debug!("BGIN: {}", self.core.name);
    // a component with no in-ports has all of its inputs immediately
    self.core.check_inputs();
    match (self.body) (&mut self.core) {
      Ok (()) => {
        let unhandled = self.core.drain();
        if 0 < unhandled {
          log::warn!("process[{}] unhandled packet count: {}",
            self.core.name, format!("{unhandled}").yellow().bold());
        }
      }
      Err (err) => {
        log::warn!("process[{}] failed: {}",
          self.core.name, format!("{err}").red().bold());
      }
    }
    self.core.close_all();
    log::debug!("END : {}", self.core.name);
  }

  /// Run on a named thread.
  pub (crate) fn spawn (self) -> std::thread::JoinHandle <()> {
    let thread_name = self.core.name.clone();
    std::thread::Builder::new().name (thread_name)
      .spawn (move || self.run())
      .expect ("failed to spawn worker thread")
  }
}

impl std::fmt::Display for Error {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      Error::EndOfStream { ref process, ref port } =>
        write!(f, "process \"{process}\": in-port \"{port}\" ended before \
          a required packet arrived"),
      Error::UnconnectedInport { ref process, ref port } =>
        write!(f, "process \"{process}\": no connection on in-port \
          \"{port}\""),
      Error::Payload { ref process, ref detail } =>
        write!(f, "process \"{process}\": {detail}"),
      Error::Config { ref process, ref detail } =>
        write!(f, "process \"{process}\" config: {detail}"),
      Error::Subnet { ref process, ref detail } =>
        write!(f, "process \"{process}\" child network: {detail}")
    }
  }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::channel;
  use crate::component::Library;

  fn empty_core() -> Core {
    Core::new (
      "test".to_string(), Value::Null, BTreeMap::new(),
      Arc::new (Library::standard()),
      BTreeMap::new(), BTreeMap::new())
  }

  #[test]
  fn set_data_round_robin() {
    let mut core = empty_core();
    let mut consumers = Vec::new();
    let mut producers = Vec::new();
    for _ in 0..3 {
      let (sourcepoint, endpoint) = channel (8);
      producers.push (sourcepoint);
      consumers.push (endpoint);
    }
    core.outports.insert ("out".to_string(), producers);
    for i in 0..6 {
      core.set_data ("out", Packet::value (i)).unwrap();
    }
    // k-th send routes to connection k mod 3
    for (index, consumer) in consumers.iter().enumerate() {
      assert_eq!(consumer.try_recv(), Ok (Packet::value (index)));
      assert_eq!(consumer.try_recv(), Ok (Packet::value (index + 3)));
    }
  }

  #[test]
  fn set_data_unconnected_is_noop() {
    let mut core = empty_core();
    assert!(core.set_data ("nowhere", Packet::value (1)).is_ok());
  }

  #[test]
  fn get_data_end_of_stream() {
    let mut core = empty_core();
    let (mut sourcepoint, endpoint) = channel (8);
    core.inports.insert ("in".to_string(), vec![endpoint]);
    sourcepoint.send (Packet::value ("x")).unwrap();
    sourcepoint.close();
    assert_eq!(
      core.get_data ("in").unwrap(),
      Recv::Payload (Packet::value ("x")));
    assert_eq!(core.get_data ("in").unwrap(), Recv::End);
    assert!(
      core.get_data ("in").unwrap().ok_or_end ("test", "in").is_err());
  }

  #[test]
  fn get_data_unconnected_inport() {
    let mut core = empty_core();
    assert_eq!(
      core.get_data ("ghost"),
      Err (Error::UnconnectedInport {
        process: "test".to_string(),
        port:    "ghost".to_string()
      }));
  }

  #[test]
  fn poll_distinguishes_not_ready() {
    let mut core = empty_core();
    let (mut sourcepoint, endpoint) = channel (8);
    core.inports.insert ("in".to_string(), vec![endpoint]);
    assert_eq!(core.poll_data_at (0, "in").unwrap(), Poll::NotReady);
    sourcepoint.send (Packet::value (5)).unwrap();
    assert_eq!(
      core.poll_data_at (0, "in").unwrap(),
      Poll::Payload (Packet::value (5)));
    sourcepoint.close();
    assert_eq!(core.poll_data_at (0, "in").unwrap(), Poll::End);
  }

  #[test]
  fn event_emitted_after_all_inputs() {
    let mut core = empty_core();
    let (data_sourcepoint, data_endpoint) = channel (8);
    let (events_sourcepoint, events_endpoint) = channel (8);
    core.inports.insert ("in".to_string(), vec![data_endpoint]);
    core.outports.insert (EVENTS_PORT.to_string(), vec![events_sourcepoint]);
    core.check_inputs();
    // not yet: the in-port has not produced a payload
    assert_eq!(
      events_endpoint.try_recv(),
      Err (channel::TryRecvError::Empty));
    data_sourcepoint.send (Packet::value (1)).unwrap();
    let _ = core.get_data ("in").unwrap();
    let event = events_endpoint.try_recv().unwrap();
    let event = event.as_event().unwrap();
    assert_eq!(event.sender, "test");
    assert_eq!(event.kind, message::RECEIVED_ALL_INPUTS);
    assert!(event.blocker.is_none());
    // emitted only once
    drop (data_sourcepoint);
    assert_eq!(core.get_data ("in").unwrap(), Recv::End);
    assert_eq!(
      events_endpoint.try_recv(),
      Err (channel::TryRecvError::Empty));
  }

  #[test]
  fn event_with_no_inports_is_immediate() {
    let mut core = empty_core();
    let (events_sourcepoint, events_endpoint) = channel (8);
    core.outports.insert (EVENTS_PORT.to_string(), vec![events_sourcepoint]);
    core.check_inputs();
    let event = events_endpoint.try_recv().unwrap();
    assert_eq!(
      event.as_event().unwrap().kind, message::RECEIVED_ALL_INPUTS);
  }

  #[test]
  fn blocking_event_waits_for_acknowledgement() {
    let mut core = empty_core();
    let (events_sourcepoint, events_endpoint) = channel (8);
    core.outports.insert (EVENTS_PORT.to_string(), vec![events_sourcepoint]);
    core.block_cfg.insert (message::RECEIVED_ALL_INPUTS.to_string(), true);
    let worker = std::thread::spawn (move || {
      core.check_inputs();   // blocks until acknowledged
      core
    });
    let event = events_endpoint.recv().unwrap();
    let event = event.as_event().unwrap();
    event.blocker.as_ref().unwrap().signal();
    let _core = worker.join().unwrap();
  }

  #[test]
  fn drain_counts_unhandled_packets() {
    let mut core = empty_core();
    let (sourcepoint, endpoint) = channel (8);
    core.inports.insert ("in".to_string(), vec![endpoint]);
    for i in 0..3 {
      sourcepoint.send (Packet::value (i)).unwrap();
    }
    drop (sourcepoint);
    assert_eq!(core.drain(), 3);
  }
}
