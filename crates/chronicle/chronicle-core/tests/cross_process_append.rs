//! Two real OS processes append concurrently to the same cycle file; this
//! exercises the record-header CAS across process boundaries rather than
//! just across threads in one address space, where a bug in the claim
//! protocol would show up as a torn header or a duplicated index.

use chronicle_core::{Queue, RawDecoder, index_seq};
use std::collections::HashSet;
use std::env;
use std::io::Write;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const ENV_ROLE: &str = "CHRONICLE_TEST_ROLE";
const ENV_DIR: &str = "CHRONICLE_TEST_DIR";
const ENV_WRITER_TAG: &str = "CHRONICLE_TEST_WRITER_TAG";
const RECORDS_PER_WRITER: usize = 200;

macro_rules! log {
    ($($arg:tt)*) => {{
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, $($arg)*);
        let _ = stderr.flush();
    }};
}

fn tmp_dir() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("/tmp/chronicle_core_cross_process_{ts}")
}

/// Entry point run inside a spawned writer process: appends
/// `RECORDS_PER_WRITER` tagged records to the shared queue directory and
/// exits without returning control to the test harness.
fn run_writer_role() -> ! {
    let dir = env::var(ENV_DIR).expect("writer role requires CHRONICLE_TEST_DIR");
    let tag = env::var(ENV_WRITER_TAG).expect("writer role requires CHRONICLE_TEST_WRITER_TAG");
    let queue = Queue::builder(&dir)
        .roll_scheme("FAST_HOURLY")
        .create(true)
        .open()
        .expect("writer failed to open queue");
    for i in 0..RECORDS_PER_WRITER {
        let payload = format!("{tag}-{i}");
        queue
            .append(payload.into_bytes())
            .expect("writer failed to append");
    }
    log!("writer {tag} done");
    std::process::exit(0);
}

#[test]
fn two_processes_append_concurrently_without_colliding_indices() {
    if env::var(ENV_ROLE).as_deref() == Ok("writer") {
        run_writer_role();
    }

    let dir = tmp_dir();
    std::fs::create_dir_all(&dir).unwrap();
    // Pre-create the queue and its directory-listing file before the
    // children race to open it, so the test isolates slot-claim contention
    // from directory-listing creation races (a separate concern).
    Queue::builder(&dir)
        .roll_scheme("FAST_HOURLY")
        .create(true)
        .open()
        .unwrap()
        .close()
        .unwrap();

    let exe = env::current_exe().unwrap();
    let test_name = "two_processes_append_concurrently_without_colliding_indices";

    let mut children = Vec::new();
    for tag in ["alpha", "beta"] {
        let child = Command::new(&exe)
            .arg("--exact")
            .arg(test_name)
            .arg("--nocapture")
            .env(ENV_ROLE, "writer")
            .env(ENV_DIR, &dir)
            .env(ENV_WRITER_TAG, tag)
            .spawn()
            .expect("failed to spawn writer process");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().expect("failed to wait on writer process");
        assert!(status.success(), "writer process exited with {status:?}");
    }

    let queue = Queue::builder(&dir)
        .roll_scheme("FAST_HOURLY")
        .create(false)
        .open()
        .unwrap();
    let mut tailer = queue.tailer().unwrap();
    let mut seen = HashSet::new();
    let mut collected = Vec::new();
    while let Some(record) = tailer.collect(&RawDecoder).unwrap() {
        assert!(
            seen.insert(index_seq(record.index)),
            "duplicate sequence number {}",
            index_seq(record.index)
        );
        collected.push(String::from_utf8(record.value).unwrap());
    }

    assert_eq!(collected.len(), RECORDS_PER_WRITER * 2);
    let alpha_count = collected.iter().filter(|s| s.starts_with("alpha-")).count();
    let beta_count = collected.iter().filter(|s| s.starts_with("beta-")).count();
    assert_eq!(alpha_count, RECORDS_PER_WRITER);
    assert_eq!(beta_count, RECORDS_PER_WRITER);

    let _ = std::fs::remove_dir_all(&dir);
}
