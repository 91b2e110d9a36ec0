#![allow(dead_code)]

//! Shared fixtures: a connected client over the in-memory service, plus a
//! polling helper for asserting on asynchronous event delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use grove::core::open_acl_unsafe;
use grove::memory::MemoryCoordination;
use grove::{Config, Coordination, CreateMode, PropertyMap, TreeClient};

pub fn connected() -> (Arc<MemoryCoordination>, TreeClient) {
    let svc = Arc::new(MemoryCoordination::new());
    let client = TreeClient::connect(svc.clone() as Arc<dyn Coordination>, &Config::default())
        .expect("connect against in-memory service");
    (svc, client)
}

/// Create a persistent node with raw data and a wide-open ACL.
pub fn mknode(svc: &MemoryCoordination, path: &str, data: &str) {
    svc.create(path, data, &open_acl_unsafe(), CreateMode::Persistent)
        .expect("fixture node creation");
}

pub fn props(pairs: &[(&str, serde_json::Value)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Poll until `predicate` holds, failing the test after two seconds.
/// Event delivery runs on the client's own thread, so tests observe its
/// effects with bounded waiting rather than sleeps.
pub fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for: {what}");
}
