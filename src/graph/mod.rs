//! Graph data model and editor.
//!
//! A [`Graph`] is the declarative input to the runtime: processes keyed
//! by name, an ordered connection list (wired connections and initial
//! information packets), and exported port maps. The editor operations
//! are pure in-place transformations with no effects beyond the given
//! graph; the on-disk representation is JSON with exactly this shape.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

////////////////////////////////////////////////////////////////////////////////
//  structs
////////////////////////////////////////////////////////////////////////////////

/// A graph of data relationships between the ports of components.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
  #[serde(default)]
  pub processes   : BTreeMap <String, Process>,
  #[serde(default)]
  pub connections : Vec <Connection>,
  #[serde(default)]
  pub inports     : BTreeMap <String, Endpoint>,
  #[serde(default)]
  pub outports    : BTreeMap <String, Endpoint>
}

/// A named process: a component instantiation with optional metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Process {
  pub component : String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata  : Option <Metadata>
}

/// Process metadata. The `config` object is component-defined; any other
/// metadata keys are carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub config : Value,
  #[serde(flatten)]
  pub extra  : serde_json::Map <String, Value>
}

/// One entry of the connection list: either a wired connection (`src`
/// present) or an initial information packet (`data` present, no `src`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub src  : Option <Endpoint>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data : Option <Value>,
  pub tgt  : Endpoint
}

/// A (process, port) endpoint as referenced by connections and exported
/// ports.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Endpoint {
  pub process : String,
  pub port    : String
}

/// A connection source; a bare process name defaults to port `"out"`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceRef (pub Endpoint);

/// A connection target; a bare process name defaults to port `"in"`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetRef (pub Endpoint);

////////////////////////////////////////////////////////////////////////////////
//  enums
////////////////////////////////////////////////////////////////////////////////

/// Error in an editor operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EditError {
  UnknownProcess  { name : String },
  ConfigNotObject { name : String }
}

/// Error loading a graph file.
#[derive(Debug)]
pub enum LoadError {
  Io    (std::io::Error),
  Parse (serde_json::Error)
}

////////////////////////////////////////////////////////////////////////////////
//  impls
////////////////////////////////////////////////////////////////////////////////

impl Graph {
  /// An empty graph.
  pub fn new() -> Self {
    Self::default()
  }

  /// Load a JSON graph file.
  ///
  /// # Errors
  ///
  /// Fails when the file is unreadable or is not a JSON graph.
  pub fn from_path <P : AsRef <std::path::Path>> (path : P)
    -> Result <Self, LoadError>
  {
    let text = std::fs::read_to_string (path)?;
    Ok (serde_json::from_str (&text)?)
  }

  /// Add (or replace) a named process, returning it for metadata edits.
  ///
  /// ```
  /// # use rivulet::graph::Graph;
  /// let mut graph = Graph::new();
  /// graph.add_process ("noop1", "NoOp");
  /// assert_eq!(graph.processes["noop1"].component, "NoOp");
  /// ```
  pub fn add_process (&mut self, name : &str, component : &str)
    -> &mut Process
  {
    self.processes.insert (name.to_string(), Process {
      component: component.to_string(),
      metadata:  None
    });
    self.processes.get_mut (name).expect ("process was just inserted")
  }

  /// Shallow-merge a config patch into the named process's
  /// `metadata.config` object.
  ///
  /// # Errors
  ///
  /// Fails when the process does not exist or the patch is not a JSON
  /// object.
  pub fn set_config (&mut self, process_name : &str, patch : Value)
    -> Result <(), EditError>
  {
    let Value::Object (entries) = patch else {
      return Err (EditError::ConfigNotObject {
        name: process_name.to_string()
      })
    };
    let process = self.processes.get_mut (process_name).ok_or_else (||
      EditError::UnknownProcess { name: process_name.to_string() })?;
    let metadata = process.metadata.get_or_insert_with (Metadata::default);
    if !metadata.config.is_object() {
      metadata.config = Value::Object (serde_json::Map::new());
    }
    let Value::Object (config) = &mut metadata.config else {
      unreachable!("config was just made an object")
    };
    for (key, value) in entries {
      config.insert (key, value);
    }
    Ok (())
  }

  /// Append a wired connection.
  ///
  /// ```
  /// # use rivulet::graph::Graph;
  /// let mut graph = Graph::new();
  /// // bare names default to ports "out" and "in"
  /// graph.add_connection ("noop1", "noop2");
  /// graph.add_connection (("add1", "sum"), ("add3", "a"));
  /// assert_eq!(graph.connections[0].src.as_ref().unwrap().port, "out");
  /// assert_eq!(graph.connections[1].tgt.port, "a");
  /// ```
  pub fn add_connection <S, T> (&mut self, src : S, tgt : T) where
    S : Into <SourceRef>,
    T : Into <TargetRef>
  {
    let SourceRef (src) = src.into();
    let TargetRef (tgt) = tgt.into();
    self.connections.push (Connection { src: Some (src), data: None, tgt });
  }

  /// Append an initial information packet: a connection carrying `data`
  /// and no source.
  pub fn add_iip <T : Into <TargetRef>> (&mut self, data : Value, tgt : T) {
    let TargetRef (tgt) = tgt.into();
    self.connections.push (Connection { src: None, data: Some (data), tgt });
  }

  /// Export an internal endpoint under an external port name.
  pub fn add_export (&mut self,
    external_name : &str,
    internal      : Endpoint,
    is_inport     : bool)
  {
    if is_inport {
      self.inports.insert (external_name.to_string(), internal);
    } else {
      self.outports.insert (external_name.to_string(), internal);
    }
  }

  /// Merge a graph fragment into this graph: processes and exported
  /// ports are shallow-merged (edits win), connections are appended.
  ///
  /// Merging an empty graph is the identity.
  pub fn modify (&mut self, edits : Graph) {
    self.processes.extend (edits.processes);
    self.inports.extend (edits.inports);
    self.outports.extend (edits.outports);
    self.connections.extend (edits.connections);
  }

  /// The `metadata.config` value of the named process, if any.
  pub fn config_of (&self, process_name : &str) -> Option <&Value> {
    self.processes.get (process_name)
      .and_then (|process| process.metadata.as_ref())
      .map (|metadata| &metadata.config)
  }

  /// Render the graph as a Graphviz DOT document: processes as nodes,
  /// connections as labeled edges, initial information packets as note
  /// nodes and exported ports as house-shaped boundary nodes.
  pub fn dotfile (&self) -> String {
    /// Escape HTML special characters
    #[inline]
    fn escape (s : &str) -> String {
      use marksman_escape::Escape;
      String::from_utf8 (Escape::new (s.bytes()).collect()).unwrap()
    }
    let mut s = String::new();

    // begin graph
    s.push_str (
      "digraph {\
     \n  overlap=scale\
     \n  rankdir=LR\
     \n  node [shape=hexagon, fontname=\"Sans Bold\"]\
     \n  edge [style=dashed, arrowhead=vee, fontname=\"Sans\"]\n");

    // nodes (processes)
    for (process_name, process) in &self.processes {
      s.push_str (format!(
        "  \"{}\" [label=<<B>{}</B><BR/><FONT FACE=\"Mono\">{}</FONT>>]\n",
        process_name,
        escape (process_name),
        escape (&process.component)).as_str());
    }

    // nodes (exported ports)
    for external_name in self.inports.keys() {
      s.push_str (format!(
        "  \"in:{0}\" [label=<<I>{1}</I>>, shape=house, style=\"\"]\n",
        external_name, escape (external_name)).as_str());
    }
    for external_name in self.outports.keys() {
      s.push_str (format!(
        "  \"out:{0}\" [label=<<I>{1}</I>>, shape=invhouse, style=\"\"]\n",
        external_name, escape (external_name)).as_str());
    }

    // edges (connections)
    for (index, connection) in self.connections.iter().enumerate() {
      let tgt = &connection.tgt;
      match connection.src {
        Some (ref src) => {
          s.push_str (format!(
            "  \"{}\" -> \"{}\" [label=<<FONT FACE=\"Sans Italic\">{} \
              &rarr; {}</FONT>>]\n",
            src.process, tgt.process,
            escape (&src.port), escape (&tgt.port)).as_str());
        }
        None => {
          let data = connection.data.as_ref().map (ToString::to_string)
            .unwrap_or_default();
          s.push_str (format!(
            "  \"iip{0}\" [label=<<FONT FACE=\"Mono\">{1}</FONT>>, \
              shape=note, style=\"\"]\n",
            index, escape (&data)).as_str());
          s.push_str (format!(
            "  \"iip{}\" -> \"{}\" [label=<<FONT FACE=\"Sans Italic\">\
              {}</FONT>>]\n",
            index, tgt.process, escape (&tgt.port)).as_str());
        }
      }
    }

    // edges (exported ports)
    for (external_name, internal) in &self.inports {
      s.push_str (format!(
        "  \"in:{}\" -> \"{}\" [label=<<FONT FACE=\"Sans Italic\">{}\
          </FONT>>]\n",
        external_name, internal.process, escape (&internal.port)).as_str());
    }
    for (external_name, internal) in &self.outports {
      s.push_str (format!(
        "  \"{}\" -> \"out:{}\" [label=<<FONT FACE=\"Sans Italic\">{}\
          </FONT>>]\n",
        internal.process, external_name, escape (&internal.port)).as_str());
    }

    // end graph
    s.push_str ("}\n");
    s
  }
}

impl Connection {
  /// An initial information packet is a connection with no source.
  pub fn is_iip (&self) -> bool {
    self.src.is_none()
  }
}

impl Endpoint {
  pub fn new (process : &str, port : &str) -> Self {
    Endpoint {
      process: process.to_string(),
      port:    port.to_string()
    }
  }
}

impl From <&str> for SourceRef {
  fn from (process_name : &str) -> Self {
    SourceRef (Endpoint::new (process_name, "out"))
  }
}

impl From <(&str, &str)> for SourceRef {
  fn from ((process_name, port_name) : (&str, &str)) -> Self {
    SourceRef (Endpoint::new (process_name, port_name))
  }
}

impl From <Endpoint> for SourceRef {
  fn from (endpoint : Endpoint) -> Self {
    SourceRef (endpoint)
  }
}

impl From <&str> for TargetRef {
  fn from (process_name : &str) -> Self {
    TargetRef (Endpoint::new (process_name, "in"))
  }
}

impl From <(&str, &str)> for TargetRef {
  fn from ((process_name, port_name) : (&str, &str)) -> Self {
    TargetRef (Endpoint::new (process_name, port_name))
  }
}

impl From <Endpoint> for TargetRef {
  fn from (endpoint : Endpoint) -> Self {
    TargetRef (endpoint)
  }
}

impl std::fmt::Display for EditError {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      EditError::UnknownProcess { ref name } =>
        write!(f, "no process named \"{name}\" in graph"),
      EditError::ConfigNotObject { ref name } =>
        write!(f, "config patch for process \"{name}\" is not an object")
    }
  }
}

impl std::error::Error for EditError {}

impl std::fmt::Display for LoadError {
  fn fmt (&self, f : &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      LoadError::Io    (ref err) => write!(f, "reading graph file: {err}"),
      LoadError::Parse (ref err) => write!(f, "parsing graph file: {err}")
    }
  }
}

impl std::error::Error for LoadError {
  fn source (&self) -> Option <&(dyn std::error::Error + 'static)> {
    match *self {
      LoadError::Io    (ref err) => Some (err),
      LoadError::Parse (ref err) => Some (err)
    }
  }
}

impl From <std::io::Error> for LoadError {
  fn from (err : std::io::Error) -> Self {
    LoadError::Io (err)
  }
}

impl From <serde_json::Error> for LoadError {
  fn from (err : serde_json::Error) -> Self {
    LoadError::Parse (err)
  }
}

////////////////////////////////////////////////////////////////////////////////
//  functions
////////////////////////////////////////////////////////////////////////////////

pub fn report_sizes() {
  println!("graph report sizes...");
  println!("  size of Graph: {}",      std::mem::size_of::<Graph>());
  println!("  size of Connection: {}", std::mem::size_of::<Connection>());
  println!("...graph report sizes");
}

////////////////////////////////////////////////////////////////////////////////
//  tests
////////////////////////////////////////////////////////////////////////////////
