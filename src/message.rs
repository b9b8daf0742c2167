//! Information packets and internal events.

use serde_json::Value;

////////////////////////////////////////////////////////////////////////////////
//  constants
////////////////////////////////////////////////////////////////////////////////

/// Internal event kind emitted by a worker the first time it has received
/// a payload on every one of its declared in-ports.
pub const RECEIVED_ALL_INPUTS : &str = "ReceivedAllInputs";

////////////////////////////////////////////////////////////////////////////////
//  structs
////////////////////////////////////////////////////////////////////////////////

/// Internal lifecycle event broadcast by a worker on its reserved
/// `events` out-port.
///
/// When the worker's blocking configuration enables the event kind, a
/// fresh single-use [`AckHandle`] rides along and the sender waits on the
/// counterpart [`AckWait`] until some downstream process signals it.
#[derive(Clone, Debug)]
pub struct Event {
  pub sender  : String,
  pub kind    : String,
  pub blocker : Option <AckHandle>
}

/// Signalling half of a single-use acknowledgement pair.
#[derive(Clone)]
pub struct AckHandle {
  tx : crossbeam_channel::Sender <()>
}

/// Waiting half of a single-use acknowledgement pair.
pub struct AckWait {
  rx : crossbeam_channel::Receiver <()>
}

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

/// One information packet traversing a channel.
#[derive(Clone, Debug)]
pub enum Packet {
  /// Ordinary data payload.
  Value (Value),
  /// Internal lifecycle event.
  Event (Event),
  /// Tuple of packets grouped by a `Join` process, in connection-index
  /// order.
  Group (Vec <Packet>)
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl Packet {
  pub fn value <V : Into <Value>> (value : V) -> Self {
    Packet::Value (value.into())
  }

  pub fn as_value (&self) -> Option <&Value> {
    match *self {
      Packet::Value (ref value) => Some (value),
      _ => None
    }
  }

  pub fn as_event (&self) -> Option <&Event> {
    match *self {
      Packet::Event (ref event) => Some (event),
      _ => None
    }
  }
}

impl PartialEq for Packet {
  /// Structural equality; acknowledgement handles are ignored.
  fn eq (&self, other : &Self) -> bool {
    match (self, other) {
      (Packet::Value (x), Packet::Value (y)) => x == y,
      (Packet::Event (x), Packet::Event (y)) =>
        x.sender == y.sender && x.kind == y.kind,
      (Packet::Group (x), Packet::Group (y)) => x == y,
      _ => false
    }
  }
}

impl std::fmt::Display for Packet {
  /// Strings render bare (standard-output parity), groups as tuples.
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      Packet::Value (Value::String (ref string)) => f.write_str (string),
      Packet::Value (ref value) => write!(f, "{value}"),
      Packet::Event (ref event) =>
        write!(f, "event[{}/{}]", event.sender, event.kind),
      Packet::Group (ref elements) => {
        f.write_str ("(")?;
        for (i, element) in elements.iter().enumerate() {
          if 0 < i {
            f.write_str (", ")?;
          }
          write!(f, "{element}")?;
        }
        f.write_str (")")
      }
    }
  }
}

impl Event {
  pub fn new (sender : &str, kind : &str) -> Self {
    Event {
      sender:  sender.to_string(),
      kind:    kind.to_string(),
      blocker: None
    }
  }
}

impl AckHandle {
  /// Release the waiting process. Signalling more than once, or after the
  /// waiter has gone away, is a no-op.
  pub fn signal (&self) {
    let _ = self.tx.try_send (());
  }
}

impl std::fmt::Debug for AckHandle {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    "AckHandle(..)".fmt (f)
  }
}

impl AckWait {
  /// Block until the handle is signalled. A handle dropped unsignalled
  /// releases the waiter rather than deadlocking it.
  pub fn wait (&self) {
    let _ = self.rx.recv();
  }
}

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

/// Create a fresh single-use acknowledgement pair.
pub fn ack_pair() -> (AckHandle, AckWait) {
  let (tx, rx) = crossbeam_channel::bounded (1);
  (AckHandle { tx }, AckWait { rx })
}

pub fn report_sizes() {
  println!("message report sizes...");
  println!("  size of Packet: {}", std::mem::size_of::<Packet>());
  println!("  size of Event: {}",  std::mem::size_of::<Event>());
  println!("...message report sizes");
}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_renders_strings_bare() {
    assert_eq!(Packet::value ("hello").to_string(), "hello");
    assert_eq!(Packet::value (7).to_string(), "7");
    let group = Packet::Group (vec![Packet::value (10), Packet::value (20)]);
    assert_eq!(group.to_string(), "(10, 20)");
  }

  #[test]
  fn ack_signal_releases_waiter() {
    let (handle, wait) = ack_pair();
    handle.signal();
    wait.wait();
    // repeated signals are harmless
    handle.signal();
  }

  #[test]
  fn ack_dropped_handle_releases_waiter() {
    let (handle, wait) = ack_pair();
    drop (handle);
    wait.wait();
  }

  #[test]
  fn packet_equality_ignores_blockers() {
    let (handle, _wait) = ack_pair();
    let mut event = Event::new ("p1", RECEIVED_ALL_INPUTS);
    event.blocker = Some (handle);
    assert_eq!(
      Packet::Event (event),
      Packet::Event (Event::new ("p1", RECEIVED_ALL_INPUTS)));
  }
}
