//! Flow-based programming runtime.
//!
//! A declarative [`Graph`](graph::Graph) of processes connected by named
//! ports is rewritten by the [`normalize`] passes into executable form,
//! materialized by the [`network`] engine into worker threads joined by
//! bounded channels, run, and torn down by end-of-stream propagation:
//! closing a network's external in-ports cascades EOF through every
//! worker until all of them drain and exit.

////////////////////////////////////////////////////////////////////////////////
//  modules
////////////////////////////////////////////////////////////////////////////////

pub mod channel;
pub mod component;
pub mod engine;
pub mod graph;
pub mod message;
pub mod network;
pub mod normalize;
pub mod process;

////////////////////////////////////////////////////////////////////////////////
//  reexports
////////////////////////////////////////////////////////////////////////////////

pub use component::Library;
pub use graph::Graph;
pub use message::Packet;
pub use network::Network;
pub use process::{Core, Worker};

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

pub fn report() {
  println!("rivulet report...");
  channel::report_sizes::<Packet>();
  message::report_sizes();
  graph::report_sizes();
  component::report();
  network::report_sizes();
  println!("...rivulet report");
}
