//! An echo service between two stacks.
//!
//! Both stacks live in this process and are wired together by a pair of loopback devices. The
//! server side accepts a single connection and returns everything it reads. The client sends each
//! message, prints the echo and closes.
use std::io::{stdout, Write};
use std::thread;

use structopt::StructOpt;

use esnet::{Config, Endpoint, Stack};
use esnet::nic::loopback::Loopback;
use esnet::time::Duration;
use esnet::wire::{Ipv4Address, Ipv4Cidr};

fn main() {
    let Options {
        server,
        client,
        port,
        mtu,
        timeout,
        messages,
    } = Options::from_args();

    let config = Config::default().nagle(false);
    let server_stack = Stack::new(config.clone());
    let client_stack = Stack::new(config);
    let (server_nic, client_nic) = Loopback::pair(mtu);
    server_stack.add_interface(server_nic, Ipv4Cidr::new(server, 24))
        .expect("Couldn't attach the server interface");
    client_stack.add_interface(client_nic, Ipv4Cidr::new(client, 24))
        .expect("Couldn't attach the client interface");
    server_stack.start();
    client_stack.start();

    let mut listener = server_stack.stream_socket();
    listener.bind(Endpoint::new(server, port)).expect("Couldn't bind the server");
    listener.listen(1).expect("Couldn't listen");

    let echo = thread::spawn(move || {
        let mut connection = listener.accept().expect("Accept failed");
        let mut buf = vec![0; 1 << 12];
        let mut echoed = 0;
        loop {
            let len = connection.read(&mut buf).expect("Reading failed");
            if len == 0 {
                break;
            }
            let mut sent = 0;
            while sent < len {
                sent += connection.write(&buf[sent..len]).expect("Writing failed");
            }
            echoed += len;
        }
        connection.close();
        echoed
    });

    let mut socket = client_stack.stream_socket();
    socket.set_timeout(Some(Duration::from_secs(timeout)));
    socket.connect(Endpoint::new(server, port)).expect("Couldn't connect");

    let out = stdout();
    let mut out = out.lock();
    let mut buf = vec![0; 1 << 12];
    for message in messages.iter() {
        let bytes = message.as_bytes();
        let mut sent = 0;
        while sent < bytes.len() {
            sent += socket.write(&bytes[sent..]).expect("Writing failed");
        }

        let mut received = Vec::new();
        while received.len() < bytes.len() {
            let len = socket.read(&mut buf).expect("Reading failed");
            if len == 0 {
                break;
            }
            received.extend_from_slice(&buf[..len]);
        }
        writeln!(out, "{}", String::from_utf8_lossy(&received)).unwrap();
    }

    socket.shutdown_output().expect("Couldn't close the connection");
    while socket.read(&mut buf).expect("Reading failed") > 0 {}
    socket.close();

    let echoed = echo.join().expect("Echo thread panicked");
    writeln!(out, "echoed {} octets", echoed).unwrap();

    client_stack.stop();
    server_stack.stop();
}

#[derive(StructOpt)]
struct Options {
    /// Address of the echo server.
    #[structopt(long = "server", default_value = "10.0.0.1")]
    server: Ipv4Address,
    /// Address of the client.
    #[structopt(long = "client", default_value = "10.0.0.2")]
    client: Ipv4Address,
    #[structopt(long = "port", default_value = "7")]
    port: u16,
    #[structopt(long = "mtu", default_value = "1500")]
    mtu: usize,
    /// Seconds to wait for the peer before giving up.
    #[structopt(long = "timeout", default_value = "10")]
    timeout: u64,
    messages: Vec<String>,
}
