//! End-to-end flush scenarios: draining a host's `H-toLVM` requests into
//! the volume group, on an explicit flush call and on disconnect.

use std::sync::Arc;

use tempfile::tempdir;
use xenvm::host::{ExpandVolume, HostRegistry, HostState};
use xenvm::ring::Producer;
use xenvm::vg::VgStore;

fn push_expand_request(to_lvm_path: &std::path::Path, volume_name: &str, segments: Vec<(u64, u64)>) {
    let mut producer = Producer::attach(to_lvm_path).unwrap();
    let request = ExpandVolume { volume_name: volume_name.to_string(), segments };
    let bytes = serde_json::to_vec(&request).unwrap();
    let pos = producer.push(&bytes).unwrap();
    producer.advance(pos).unwrap();
}

#[test]
fn flush_applies_one_expand_volume_request() {
    let vg_dir = tempdir().unwrap();
    let ring_dir = tempdir().unwrap();
    let vg = Arc::new(VgStore::open(vg_dir.path().join("vg.json"), "vg0", 1000).unwrap());
    let hosts = HostRegistry::new(vg.clone(), ring_dir.path());

    hosts.create("h1").unwrap();
    hosts.connect("h1").unwrap();
    hosts.grant("h1", 8).unwrap();
    vg.create_lv("vol1", 0).unwrap();

    // create() seeds H-free-h1 with extent 0; grant(8) allocates the next
    // contiguous run, (1, 8). The request must name a range owned as a
    // single segment, so it transfers that whole run rather than extent 0.
    let to_lvm_path = ring_dir.path().join("h1.to-lvm.ring");
    push_expand_request(&to_lvm_path, "vol1", vec![(1, 8)]);

    let summary = hosts.flush("vol1").unwrap();

    assert_eq!(summary.requests_drained, 1);
    assert_eq!(vg.get_lv("vol1").unwrap().extent_count(), 8);
    assert_eq!(hosts.host_free_extents("h1"), 1);
}

#[test]
fn disconnect_flushes_all_pending_requests_before_returning() {
    let vg_dir = tempdir().unwrap();
    let ring_dir = tempdir().unwrap();
    let vg = Arc::new(VgStore::open(vg_dir.path().join("vg.json"), "vg0", 1000).unwrap());
    let hosts = HostRegistry::new(vg.clone(), ring_dir.path());

    hosts.create("h1").unwrap();
    hosts.connect("h1").unwrap();
    hosts.grant("h1", 12).unwrap();
    vg.create_lv("vol1", 0).unwrap();
    vg.create_lv("vol2", 0).unwrap();
    vg.create_lv("vol3", 0).unwrap();

    // create() seeds H-free-h1 with extent 0; grant(12) allocates the next
    // contiguous run, (1, 12). Each request names a subrange of that run
    // still owned as one segment by the time it is flushed.
    let to_lvm_path = ring_dir.path().join("h1.to-lvm.ring");
    push_expand_request(&to_lvm_path, "vol1", vec![(1, 2)]);
    push_expand_request(&to_lvm_path, "vol2", vec![(3, 3)]);
    push_expand_request(&to_lvm_path, "vol3", vec![(6, 4)]);

    hosts.disconnect("h1").unwrap();

    // All three requests were applied to the VG before disconnect returned.
    assert_eq!(vg.get_lv("vol1").unwrap().extent_count(), 2);
    assert_eq!(vg.get_lv("vol2").unwrap().extent_count(), 3);
    assert_eq!(vg.get_lv("vol3").unwrap().extent_count(), 4);
    assert_eq!(hosts.host_free_extents("h1"), 4);

    // h1-toLVM is suspended and the host no longer appears in Host.all().
    assert!(hosts.all().is_empty());

    // Reconnect resumes h1-toLVM.
    hosts.connect("h1").unwrap();
    assert_eq!(hosts.all()[0].state, HostState::Connected);
    assert!(!hosts.all()[0].to_lvm_suspended);
}
