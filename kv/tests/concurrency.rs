use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hdwallet_kv::KvEnv;

#[test]
fn writers_on_distinct_subdbs_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let env = KvEnv::open(dir.path().join("db")).unwrap();
    let first = env.open_subdb("first").unwrap();
    let second = env.open_subdb("second").unwrap();

    // hold a write on `first` while another thread commits to `second`
    let tx_first = first.begin_write();
    tx_first.put(b"key", b"first value");

    let handle = {
        let second = second.clone();
        thread::spawn(move || {
            let tx = second.begin_write();
            tx.put(b"key", b"second value");
            tx.commit().unwrap();
        })
    };
    handle.join().unwrap();
    assert_eq!(
        second.begin_read().get(b"key"),
        Some(b"second value".as_ref())
    );

    tx_first.commit().unwrap();
    assert_eq!(
        first.begin_read().get(b"key"),
        Some(b"first value".as_ref())
    );
}

#[test]
fn readers_run_concurrently_with_a_writer() {
    let dir = tempfile::tempdir().unwrap();
    let env = KvEnv::open(dir.path().join("db")).unwrap();
    let subdb = env.open_subdb("main").unwrap();

    let tx = subdb.begin_write();
    tx.put(b"committed", b"no");

    // a reader on another thread is never blocked by the open writer
    let (sender, receiver) = mpsc::channel();
    {
        let subdb = subdb.clone();
        thread::spawn(move || {
            let read = subdb.begin_read();
            sender.send(read.get(b"committed").map(|v| v.to_vec())).unwrap();
        });
    }
    let observed = receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("reader blocked behind writer");
    assert_eq!(observed, None);

    tx.commit().unwrap();
    assert_eq!(subdb.begin_read().get(b"committed"), Some(b"no".as_ref()));
}

#[test]
fn second_writer_blocks_until_release() {
    let dir = tempfile::tempdir().unwrap();
    let env = KvEnv::open(dir.path().join("db")).unwrap();
    let subdb = env.open_subdb("main").unwrap();

    let tx = subdb.begin_write();
    tx.put(b"owner", b"one");

    let (sender, receiver) = mpsc::channel();
    let handle = {
        let subdb = subdb.clone();
        thread::spawn(move || {
            // blocks until the first writer commits
            let tx = subdb.begin_write();
            tx.put(b"owner", b"two");
            tx.commit().unwrap();
            sender.send(()).unwrap();
        })
    };

    // the contender must still be parked
    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());

    tx.commit().unwrap();
    receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("second writer never ran");
    handle.join().unwrap();

    assert_eq!(subdb.begin_read().get(b"owner"), Some(b"two".as_ref()));
}

#[test]
fn snapshot_readers_see_consistent_state() {
    let dir = tempfile::tempdir().unwrap();
    let env = KvEnv::open(dir.path().join("db")).unwrap();
    let subdb = env.open_subdb("main").unwrap();

    let tx = subdb.begin_write();
    tx.put(b"value", b"v1");
    tx.commit().unwrap();

    let read = subdb.begin_read();
    assert_eq!(read.get(b"value"), Some(b"v1".as_ref()));

    // a later commit does not disturb the open snapshot
    let tx = subdb.begin_write();
    tx.put(b"value", b"v2");
    tx.commit().unwrap();

    assert_eq!(read.get(b"value"), Some(b"v1".as_ref()));
    assert_eq!(subdb.begin_read().get(b"value"), Some(b"v2".as_ref()));
}
