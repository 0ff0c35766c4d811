//! End-to-end tests driving the engine over real loopback TCP sockets.

use proactor_core::{Engine, ServerConfig};
use std::ffi::c_void;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Pure echo: sends back exactly the bytes just read.
extern "C" fn full_echo(_conn: *mut c_void, _data: *const c_char, data_len: i32) -> i32 {
    data_len
}

fn connect(port: u16) -> TcpStream {
    // A freshly posted Accept may not be ready the instant `start()` returns; a short retry
    // loop absorbs that without flaking.
    let mut last_err = None;
    for _ in 0..200 {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(s) => return s,
            Err(e) => {
                last_err = Some(e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    panic!("could not connect to 127.0.0.1:{port}: {last_err:?}");
}

/// Single echo: client sends "hello"; engine invokes the callback with ("hello", 5); client
/// receives "hello" back; connection closes cleanly.
#[test]
fn single_echo() {
    static CALLBACK_COUNT: AtomicUsize = AtomicUsize::new(0);
    extern "C" fn counting_echo(conn: *mut c_void, data: *const c_char, data_len: i32) -> i32 {
        CALLBACK_COUNT.fetch_add(1, Ordering::SeqCst);
        full_echo(conn, data, data_len)
    }

    let config = ServerConfig::new("127.0.0.1", 18081);
    let engine = Engine::initialize(&config, counting_echo).expect("initialize");
    engine.start().expect("start");

    let mut stream = connect(18081);
    stream.write_all(b"hello").expect("send");

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).expect("recv");
    assert_eq!(&buf, b"hello");
    assert_eq!(CALLBACK_COUNT.load(Ordering::SeqCst), 1);

    drop(stream);
    engine.shutdown();
}

/// Binary payload: the 16 bytes `00 01 02 ... 0F` round-trip byte-for-byte.
#[test]
fn binary_payload() {
    let config = ServerConfig::new("127.0.0.1", 18082);
    let engine = Engine::initialize(&config, full_echo).expect("initialize");
    engine.start().expect("start");

    let mut stream = connect(18082);
    let payload: Vec<u8> = (0u8..16).collect();
    stream.write_all(&payload).expect("send");

    let mut buf = [0u8; 16];
    stream.read_exact(&mut buf).expect("recv");
    assert_eq!(&buf[..], &payload[..]);

    drop(stream);
    engine.shutdown();
}

/// Back-to-back: "A" / "BB" / "CCC" exchanged sequentially on a single connection, each response
/// matching its request.
#[test]
fn back_to_back_exchanges() {
    let config = ServerConfig::new("127.0.0.1", 18083);
    let engine = Engine::initialize(&config, full_echo).expect("initialize");
    engine.start().expect("start");

    let mut stream = connect(18083);

    for payload in [&b"A"[..], &b"BB"[..], &b"CCC"[..]] {
        stream.write_all(payload).expect("send");
        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).expect("recv");
        assert_eq!(buf, payload);
    }

    drop(stream);
    engine.shutdown();
}

/// Many connections: concurrent clients each send their own random-ish payload and get it back
/// with no cross-talk. The property under test (no cross-connection interleaving) does not
/// depend on the client count, so it's kept modest to keep test runtime reasonable.
#[test]
fn many_connections_no_crosstalk() {
    const CLIENTS: usize = 200;

    let config = ServerConfig::new("127.0.0.1", 18084);
    let engine = Engine::initialize(&config, full_echo).expect("initialize");
    engine.start().expect("start");

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CLIENTS)
            .map(|i| {
                scope.spawn(move || {
                    let payload: Vec<u8> = (0..64).map(|b| (b ^ i) as u8).collect();
                    let mut stream = connect(18084);
                    stream.write_all(&payload).expect("send");
                    let mut buf = vec![0u8; payload.len()];
                    stream.read_exact(&mut buf).expect("recv");
                    assert_eq!(buf, payload, "cross-talk detected for client {i}");
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("client thread panicked");
        }
    });

    engine.shutdown();
}

/// Immediate close: a client that connects and closes without sending must not trigger the
/// callback, and its `Conn` must be released without crashing the engine.
#[test]
fn immediate_close_does_not_invoke_callback() {
    static CALLBACK_COUNT: AtomicUsize = AtomicUsize::new(0);
    extern "C" fn counting_echo(conn: *mut c_void, data: *const c_char, data_len: i32) -> i32 {
        CALLBACK_COUNT.fetch_add(1, Ordering::SeqCst);
        full_echo(conn, data, data_len)
    }

    let config = ServerConfig::new("127.0.0.1", 18085);
    let engine = Engine::initialize(&config, counting_echo).expect("initialize");
    engine.start().expect("start");

    let stream = connect(18085);
    drop(stream);

    // Give the engine a moment to process the close before asserting.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(CALLBACK_COUNT.load(Ordering::SeqCst), 0);

    // The engine must still be healthy: a subsequent connection works normally.
    let mut stream = connect(18085);
    stream.write_all(b"ok").expect("send");
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).expect("recv");
    assert_eq!(&buf, b"ok");

    engine.shutdown();
}

/// Shutdown mid-traffic: with connected clients outstanding, `shutdown()` returns within bounded
/// time and the port is free for a fresh `initialize` to rebind immediately after.
#[test]
fn shutdown_mid_traffic_and_rebind() {
    const CLIENTS: usize = 20;
    let port = 18086;

    let config = ServerConfig::new("127.0.0.1", port);
    let engine = Engine::initialize(&config, full_echo).expect("initialize");
    engine.start().expect("start");

    let streams: Vec<_> = (0..CLIENTS).map(|_| connect(port)).collect();

    // shutdown() blocks until every worker has joined; returning at all proves termination, and
    // dropping the streams afterward proves the engine tolerated abrupt abandonment of
    // in-flight connections.
    engine.shutdown();
    drop(streams);

    let config = ServerConfig::new("127.0.0.1", port);
    let engine = Engine::initialize(&config, full_echo).expect("rebind after shutdown");
    engine.start().expect("start after rebind");

    let mut stream = connect(port);
    stream.write_all(b"rebound").expect("send");
    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).expect("recv");
    assert_eq!(&buf, b"rebound");

    engine.shutdown();
}

/// Over a number of connections, callbacks run on more than one distinct worker thread — i.e.
/// the pool is actually parallel, not serialized onto one thread.
#[test]
fn callbacks_run_on_multiple_worker_threads() {
    use std::collections::HashSet;
    use std::sync::Mutex;

    static THREAD_NAMES: Mutex<Vec<String>> = Mutex::new(Vec::new());
    extern "C" fn recording_echo(_conn: *mut c_void, _data: *const c_char, data_len: i32) -> i32 {
        let name = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();
        THREAD_NAMES.lock().unwrap().push(name);
        data_len
    }

    let config = ServerConfig::new("127.0.0.1", 18087).worker_count(4);
    let engine = Engine::initialize(&config, recording_echo).expect("initialize");
    engine.start().expect("start");

    std::thread::scope(|scope| {
        for i in 0..64 {
            scope.spawn(move || {
                let mut stream = connect(18087);
                let payload = [i as u8];
                stream.write_all(&payload).expect("send");
                let mut buf = [0u8; 1];
                stream.read_exact(&mut buf).expect("recv");
            });
        }
    });

    engine.shutdown();

    let names = THREAD_NAMES.lock().unwrap();
    let distinct: HashSet<&String> = names.iter().collect();
    assert!(
        distinct.len() > 1,
        "expected callbacks on more than one worker thread, saw: {distinct:?}"
    );
}
