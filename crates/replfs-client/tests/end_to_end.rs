//! End-to-end scenarios against a real (in-process) replica, covering
//! the walkthroughs in `spec.md` §8.

use std::thread;
use std::time::Duration;

use replfs_client::ClientSession;
use replfs_server::ServerInstance;
use replfs_transport::{EventSource, MulticastChannel};

fn spawn_server(port: u16) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().join("mnt");
    let mut server = ServerInstance::new(&mount).unwrap();
    let channel = MulticastChannel::new(port, 0).unwrap();
    let mut events = EventSource::with_heartbeat(channel, Duration::from_millis(20));
    thread::spawn(move || server.run(&mut events));
    thread::sleep(Duration::from_millis(50));
    dir
}

fn spawn_lossy_server(port: u16, drop_percent: u8) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().join("mnt");
    let mut server = ServerInstance::new(&mount).unwrap();
    let channel = MulticastChannel::new(port, drop_percent).unwrap();
    let mut events = EventSource::with_heartbeat(channel, Duration::from_millis(20));
    thread::spawn(move || server.run(&mut events));
    thread::sleep(Duration::from_millis(50));
    dir
}

#[test]
fn abort_discards_writes() {
    let dir = spawn_server(45_101);
    let mut client = ClientSession::new(45_101, 0, 1).unwrap();
    let file = client.open_file("hello.txt").unwrap();
    for i in 0..100 {
        let line = format!("{i}\n");
        client.write_block(file, line.as_bytes(), 0).unwrap();
    }
    client.abort(file).unwrap();
    assert!(!dir.path().join("mnt").join("hello.txt").exists());
}

#[test]
fn commit_overlaps_overwrite_in_order_without_truncating() {
    let dir = spawn_server(45_102);
    let mut client = ClientSession::new(45_102, 0, 1).unwrap();
    let file = client.open_file("numbers.txt").unwrap();
    client
        .write_block(file, b"I'm so very happy", 17)
        .unwrap();
    client.commit(file).unwrap();

    client.write_block(file, b"I'm so very sad", 17).unwrap();
    client.abort(file).unwrap();
    client.close_file(file).unwrap();

    let contents = std::fs::read(dir.path().join("mnt").join("numbers.txt")).unwrap();
    assert_eq!(&contents[17..17 + 17], b"I'm so very happy");
}

#[test]
fn empty_commit_creates_an_empty_file() {
    let dir = spawn_server(45_103);
    let mut client = ClientSession::new(45_103, 0, 1).unwrap();
    let file = client.open_file("should_be_empty.txt").unwrap();
    client.commit(file).unwrap();
    client.close_file(file).unwrap();
    let path = dir.path().join("mnt").join("should_be_empty.txt");
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
}

#[test]
fn open_then_abort_leaves_no_file() {
    let dir = spawn_server(45_104);
    let mut client = ClientSession::new(45_104, 0, 1).unwrap();
    let file = client.open_file("should_not_exist.txt").unwrap();
    client.abort(file).unwrap();
    assert!(!dir.path().join("mnt").join("should_not_exist.txt").exists());
}

#[test]
fn selective_retransmission_recovers_dropped_writes() {
    let dir = spawn_lossy_server(45_105, 35);
    let mut client = ClientSession::new(45_105, 0, 1).unwrap();
    let file = client.open_file("lossy.txt").unwrap();
    for i in 0..20u8 {
        client.write_block(file, &[i], i as u32).unwrap();
    }
    client.commit(file).unwrap();
    client.close_file(file).unwrap();

    let contents = std::fs::read(dir.path().join("mnt").join("lossy.txt")).unwrap();
    assert_eq!(contents, (0u8..20).collect::<Vec<u8>>());
}

#[test]
fn write_budget_is_enforced() {
    let _dir = spawn_server(45_106);
    let mut client = ClientSession::new(45_106, 0, 1).unwrap();
    let file = client.open_file("budget.txt").unwrap();
    for _ in 0..127 {
        client.write_block(file, b"x", 0).unwrap();
    }
    assert!(client.write_block(file, b"x", 0).is_err());
}
