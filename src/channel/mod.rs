//! Bounded point-to-point channels.
//!
//! Every connection in a network is one channel: a bounded FIFO with a
//! producer end ([`Sourcepoint`]) and a consumer end ([`Endpoint`]).
//! Each end is owned by exactly one holder and closed exactly once; a
//! consumer observes end-of-stream ([`RecvError`]) iff the producer end
//! is closed and the buffer is drained. Closing a consumer end while data
//! remains discards the unread data.

////////////////////////////////////////////////////////////////////////////////
//  constants
////////////////////////////////////////////////////////////////////////////////

/// Buffer capacity used for every channel wired by the network engine.
pub const DEFAULT_CAPACITY : usize = 64;

////////////////////////////////////////////////////////////////////////////////
//  structs
////////////////////////////////////////////////////////////////////////////////

/// Producer end of a channel.
pub struct Sourcepoint <M> {
  sender : Option <crossbeam_channel::Sender <M>>
}

/// Consumer end of a channel.
pub struct Endpoint <M> {
  receiver : Option <crossbeam_channel::Receiver <M>>
}

/// Producer end closed, no further messages will ever be received.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecvError;

/// Consumer end closed, message will never be deliverable. The
/// undeliverable message is returned to the caller.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SendError <M> (pub M);

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TryRecvError {
  /// No buffered message; the producer end is still open.
  Empty,
  /// Producer end closed and the buffer is drained.
  Disconnected
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl <M> Sourcepoint <M> {
  /// Send a message, blocking while the buffer is full.
  ///
  /// # Errors
  ///
  /// Returns the message if this end or the consumer end is closed.
  pub fn send (&self, message : M) -> Result <(), SendError <M>> {
    match self.sender {
      Some (ref sender) => sender.send (message)
        .map_err (|send_error| SendError (send_error.into_inner())),
      None => Err (SendError (message))
    }
  }

  pub fn close (&mut self) {
    let _ = self.sender.take();
  }

  pub fn is_closed (&self) -> bool {
    self.sender.is_none()
  }
}

impl <M> Endpoint <M> {
  /// Receive a message, blocking while the buffer is empty and the
  /// producer end is open.
  ///
  /// # Errors
  ///
  /// `RecvError` is end-of-stream: the producer end is closed and the
  /// buffer is drained. Once observed, every subsequent receive on this
  /// end also observes it.
  pub fn recv (&self) -> Result <M, RecvError> {
    match self.receiver {
      Some (ref receiver) => receiver.recv().map_err (|_| RecvError),
      None => Err (RecvError)
    }
  }

  /// Non-blocking probe distinguishing not-ready from end-of-stream.
  pub fn try_recv (&self) -> Result <M, TryRecvError> {
    match self.receiver {
      Some (ref receiver) => receiver.try_recv().map_err (
        |try_recv_error| match try_recv_error {
          crossbeam_channel::TryRecvError::Empty =>
            TryRecvError::Empty,
          crossbeam_channel::TryRecvError::Disconnected =>
            TryRecvError::Disconnected
        }),
      None => Err (TryRecvError::Disconnected)
    }
  }

  pub fn close (&mut self) {
    let _ = self.receiver.take();
  }

  pub fn is_closed (&self) -> bool {
    self.receiver.is_none()
  }
}

impl <M> std::fmt::Debug for Sourcepoint <M> {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    if self.is_closed() {
      "Sourcepoint(closed)".fmt (f)
    } else {
      "Sourcepoint(open)".fmt (f)
    }
  }
}

impl <M> std::fmt::Debug for Endpoint <M> {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    if self.is_closed() {
      "Endpoint(closed)".fmt (f)
    } else {
      "Endpoint(open)".fmt (f)
    }
  }
}

impl <M> std::fmt::Debug for SendError <M> {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    "SendError(..)".fmt (f)
  }
}

impl <M> std::fmt::Display for SendError <M> {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    "sending on a closed channel".fmt (f)
  }
}

impl <M> std::error::Error for SendError <M> {}

impl std::fmt::Display for RecvError {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    "receiving on an ended channel".fmt (f)
  }
}

impl std::error::Error for RecvError {}

impl std::fmt::Display for TryRecvError {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      TryRecvError::Empty        => "channel not ready".fmt (f),
      TryRecvError::Disconnected => "receiving on an ended channel".fmt (f)
    }
  }
}

impl std::error::Error for TryRecvError {}

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

/// Create a bounded channel and return its two ends.
///
/// ```
/// let (sourcepoint, endpoint) = rivulet::channel::channel::<u32> (8);
/// sourcepoint.send (1).unwrap();
/// assert_eq!(endpoint.recv(), Ok (1));
/// ```
pub fn channel <M> (capacity : usize) -> (Sourcepoint <M>, Endpoint <M>) {
  let (sender, receiver) = crossbeam_channel::bounded (capacity);
  ( Sourcepoint { sender:   Some (sender) },
    Endpoint    { receiver: Some (receiver) })
}

pub fn report_sizes <M>() {
  println!("channel report sizes...");
  println!("  size of Sourcepoint: {}",
    std::mem::size_of::<Sourcepoint <M>>());
  println!("  size of Endpoint: {}", std::mem::size_of::<Endpoint <M>>());
  println!("...channel report sizes");
}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fifo_order() {
    let (sourcepoint, endpoint) = channel::<u32> (DEFAULT_CAPACITY);
    for i in 0..5 {
      sourcepoint.send (i).unwrap();
    }
    for i in 0..5 {
      assert_eq!(endpoint.recv(), Ok (i));
    }
  }

  #[test]
  fn eof_after_producer_close_and_drain() {
    let (mut sourcepoint, endpoint) = channel::<u32> (DEFAULT_CAPACITY);
    sourcepoint.send (1).unwrap();
    sourcepoint.send (2).unwrap();
    sourcepoint.close();
    assert!(sourcepoint.is_closed());
    // buffered data survives the close
    assert_eq!(endpoint.recv(), Ok (1));
    assert_eq!(endpoint.recv(), Ok (2));
    // eof is monotonic
    assert_eq!(endpoint.recv(), Err (RecvError));
    assert_eq!(endpoint.recv(), Err (RecvError));
  }

  #[test]
  fn try_recv_distinguishes_empty_from_eof() {
    let (mut sourcepoint, endpoint) = channel::<u32> (DEFAULT_CAPACITY);
    assert_eq!(endpoint.try_recv(), Err (TryRecvError::Empty));
    sourcepoint.send (7).unwrap();
    assert_eq!(endpoint.try_recv(), Ok (7));
    sourcepoint.close();
    assert_eq!(endpoint.try_recv(), Err (TryRecvError::Disconnected));
  }

  #[test]
  fn send_after_consumer_close_returns_message() {
    let (sourcepoint, mut endpoint) = channel::<u32> (DEFAULT_CAPACITY);
    endpoint.close();
    assert_eq!(sourcepoint.send (9), Err (SendError (9)));
  }

  #[test]
  fn send_after_local_close_returns_message() {
    let (mut sourcepoint, _endpoint) = channel::<u32> (DEFAULT_CAPACITY);
    sourcepoint.close();
    assert_eq!(sourcepoint.send (9), Err (SendError (9)));
  }

  #[test]
  fn drop_of_producer_is_close() {
    let (sourcepoint, endpoint) = channel::<u32> (1);
    sourcepoint.send (3).unwrap();
    drop (sourcepoint);
    assert_eq!(endpoint.recv(), Ok (3));
    assert_eq!(endpoint.recv(), Err (RecvError));
  }
}
