//! A user-space TCP/IP stack built from a graph of protocol conduits.
//!
//! ## Table of contents
//!
//! This is also a recommended reading order but feel free to skip ahead, each chapter tries to be
//! somewhat self-contained.
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The conduit graph](conduit/index.html)
//!    1. [Structure](conduit/index.html#structure)
//!    1. [Traversal](conduit/index.html#traversal)
//! 3. [The wire module](wire/index.html)
//! 4. [The layers](layer/index.html)
//!    1. [Receiving](layer/index.html#receiving)
//!    1. [Sending](layer/index.html#sending)
//!    1. [Answering](layer/index.html#answering)
//!    1. [Ip](layer/ip/index.html)
//!    1. [Icmp](layer/icmp/index.html)
//!    1. [Udp](layer/udp/index.html)
//!    1. [Tcp](layer/tcp/index.html)
//! 5. [Network interfaces](nic/index.html)
//! 6. Internals
//!    1. [Timers](timer/index.html)
//!    2. [The storage module](storage/index.html)
//!
//! ## Design and relevant core concepts
//!
//! Packets travel through a graph of conduits. Every node has two sides: A faces the network, B
//! faces the application. Protocol nodes run the logic of one layer, muxes pick the next node by
//! a key the layers above filled into the message, and adapters are the leaves where sockets and
//! devices attach. A mux that finds no entry for a key may consult its factory, which is how
//! listening TCP streams create connections and how fragments start a reassembly.
//!
//! ```text
//!   sockets        tcp conns    udp sockets   ping sockets
//!                      |             |             |
//!                   tcp mux       udp mux      echo mux
//!                      |             |             |
//!                     tcp           udp          icmp
//!                       \            |            /
//!                        +---- protocol mux -----+
//!                                    |
//!                                    ip
//!                                    |
//!                                scope mux
//!                                 /      \
//!   devices                   nic 1      nic 2
//! ```
//!
//! The [`Stack`] builds this graph, owns the interfaces and hands out sockets. Incoming frames are
//! either pumped by one thread per interface, or by hand with [`Stack::poll`] which makes the
//! whole stack deterministic together with a manual clock.
//!
//! ```no_run
//! use esnet::{Config, Endpoint, Stack};
//! use esnet::nic::loopback::Loopback;
//! use esnet::wire::{Ipv4Address, Ipv4Cidr};
//!
//! let stack = Stack::new(Config::default());
//! let (nic, _wire) = Loopback::pair(1500);
//! stack.add_interface(nic, Ipv4Cidr::new(Ipv4Address::new(10, 0, 0, 1), 24)).unwrap();
//! stack.start();
//!
//! let mut listener = stack.stream_socket();
//! listener.bind(Endpoint::new(Ipv4Address::UNSPECIFIED, 7)).unwrap();
//! listener.listen(16).unwrap();
//! ```
//!
//! [`Stack`]: stack/struct.Stack.html
//! [`Stack::poll`]: stack/struct.Stack.html#method.poll
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;
pub mod config;
pub mod conduit;
pub mod layer;
pub mod messenger;
pub mod nic;
pub mod registry;
pub mod stack;
pub mod storage;
pub mod time;
pub mod timer;
pub mod wire;

#[cfg(test)]
mod testing;

pub use crate::config::Config;
pub use crate::layer::{Endpoint, Error, Result};
pub use crate::layer::icmp::PingSocket;
pub use crate::layer::tcp::{State, StreamSocket};
pub use crate::layer::udp::DatagramSocket;
pub use crate::stack::Stack;
