use procwatch_daemon::collector::{
    LinuxProcessCollector, ProcessCollector, ProcessIdentity, ProcessRecord, ProcessStatus,
};
use procwatch_daemon::inventory::{Inventory, ListQuery};
use procwatch_daemon::sockets::{
    AddressFamily, ConnectionState, ProcNetCorrelator, Protocol, SocketBinding, SocketCorrelator,
};
use std::collections::HashMap;
use std::net::TcpListener;

fn record(pid: u32, name: &str, cpu: f64, mem: u64, owner: &str, argv: &[&str]) -> ProcessRecord {
    ProcessRecord {
        pid,
        ppid: 1,
        name: name.to_string(),
        executable_path: String::new(),
        owner: owner.to_string(),
        status: ProcessStatus::Sleeping,
        created_at: 0.0,
        created_at_iso: String::new(),
        cpu_percent: cpu,
        resident_memory_bytes: mem,
        priority: 0,
        command_line: argv.iter().map(|s| s.to_string()).collect(),
        open_file_count: 0,
        sockets: Vec::new(),
        start_ticks: pid as u64,
    }
}

struct FakeCollector(Vec<ProcessRecord>);

impl ProcessCollector for FakeCollector {
    fn enumerate(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_> {
        Box::new(self.0.iter().cloned())
    }

    fn get_process(&self, pid: u32) -> Option<ProcessRecord> {
        self.0.iter().find(|p| p.pid == pid).cloned()
    }

    fn resolve(&self, pid: u32) -> Option<ProcessIdentity> {
        self.get_process(pid).map(|p| p.identity())
    }

    fn is_running(&self, identity: ProcessIdentity) -> bool {
        self.resolve(identity.pid) == Some(identity)
    }
}

struct FakeCorrelator(HashMap<u32, Vec<SocketBinding>>);

impl SocketCorrelator for FakeCorrelator {
    fn correlate(&self) -> HashMap<u32, Vec<SocketBinding>> {
        self.0.clone()
    }
}

fn listen(port: u16) -> SocketBinding {
    SocketBinding {
        local_address: Some(format!("0.0.0.0:{}", port)),
        remote_address: None,
        connection_state: ConnectionState::Listen,
        address_family: AddressFamily::Inet,
        protocol: Protocol::Tcp,
    }
}

fn inventory() -> Inventory<FakeCollector, FakeCorrelator> {
    let records = vec![
        record(10, "nginx", 2.5, 4_000, "www-data", &["nginx", "-g", "daemon off;"]),
        record(20, "Postgres", 12.0, 90_000, "postgres", &["/usr/lib/postgresql/bin/postgres"]),
        record(30, "bash", 0.0, 1_000, "alice", &["-bash"]),
        record(40, "sleep", 0.0, 500, "alice", &["sleep", "100"]),
        record(50, "apache", 2.5, 8_000, "www-data", &["apache2", "-k", "start"]),
    ];
    let mut sockets = HashMap::new();
    sockets.insert(10, vec![listen(80), listen(443)]);
    sockets.insert(99, vec![listen(22)]); // pid not in the process list
    Inventory::new(FakeCollector(records), FakeCorrelator(sockets))
}

fn pids(records: &[ProcessRecord]) -> Vec<u32> {
    records.iter().map(|r| r.pid).collect()
}

#[test]
fn test_default_sort_is_cpu_descending_and_stable() {
    let items = inventory().list(&ListQuery::new(None, None, None));
    assert_eq!(pids(&items), vec![20, 10, 50, 30, 40]);
    for pair in items.windows(2) {
        assert!(pair[0].cpu_percent >= pair[1].cpu_percent);
    }
}

#[test]
fn test_unknown_sort_matches_cpu_sort() {
    let inv = inventory();
    let explicit = inv.list(&ListQuery::new(None, Some("cpu"), Some("desc")));
    for sort in [None, Some(""), Some("bogus")] {
        let items = inv.list(&ListQuery::new(None, sort, Some("desc")));
        assert_eq!(pids(&items), pids(&explicit), "sort={:?}", sort);
    }
}

#[test]
fn test_sort_keys_and_order() {
    let inv = inventory();
    let by_mem = inv.list(&ListQuery::new(None, Some("mem"), Some("asc")));
    assert_eq!(pids(&by_mem), vec![40, 30, 10, 50, 20]);

    let by_pid = inv.list(&ListQuery::new(None, Some("pid"), None));
    assert_eq!(pids(&by_pid), vec![50, 40, 30, 20, 10]);

    // case-insensitive name order
    let by_name = inv.list(&ListQuery::new(None, Some("name"), Some("asc")));
    assert_eq!(pids(&by_name), vec![50, 30, 10, 20, 40]);
}

#[test]
fn test_sockets_attached_and_never_missing() {
    let items = inventory().list(&ListQuery::default());
    let nginx = items.iter().find(|r| r.pid == 10).unwrap();
    assert_eq!(nginx.sockets.len(), 2);
    assert_eq!(nginx.sockets[0].local_address.as_deref(), Some("0.0.0.0:80"));

    for item in items.iter().filter(|r| r.pid != 10) {
        assert!(item.sockets.is_empty());
        let json = serde_json::to_value(item).unwrap();
        assert_eq!(json["sockets"], serde_json::json!([]));
    }
}

#[test]
fn test_filter_matches_pid_name_args_and_owner() {
    let inv = inventory();
    let by_owner = inv.list(&ListQuery::new(Some("WWW-DATA"), None, None));
    assert_eq!(pids(&by_owner), vec![10, 50]);

    let by_arg = inv.list(&ListQuery::new(Some("daemon off"), None, None));
    assert_eq!(pids(&by_arg), vec![10]);

    let by_pid = inv.list(&ListQuery::new(Some("40"), None, None));
    assert_eq!(pids(&by_pid), vec![40]);

    let by_name = inv.list(&ListQuery::new(Some("postgres"), None, None));
    assert_eq!(pids(&by_name), vec![20]);
}

#[test]
fn test_filter_is_subset_of_unfiltered() {
    let inv = inventory();
    for (sort, order) in [("cpu", "desc"), ("name", "asc"), ("mem", "desc")] {
        let all = pids(&inv.list(&ListQuery::new(None, Some(sort), Some(order))));
        for q in ["a", "www", "1", "sleep", "zzz"] {
            let filtered = pids(&inv.list(&ListQuery::new(Some(q), Some(sort), Some(order))));
            let mut last = None;
            for pid in &filtered {
                let pos = all.iter().position(|p| p == pid).expect("subset");
                // relative order preserved
                assert!(last.map_or(true, |l| pos > l));
                last = Some(pos);
            }
        }
    }
}

#[test]
fn test_no_match_returns_empty() {
    let items = inventory().list(&ListQuery::new(Some("doesnotexist12345"), None, None));
    assert!(items.is_empty());
}

#[test]
fn test_live_inventory_includes_self_with_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let inv = Inventory::new(LinuxProcessCollector::new(), ProcNetCorrelator::new());

    let all = inv.list(&ListQuery::default());
    for pair in all.windows(2) {
        assert!(pair[0].cpu_percent >= pair[1].cpu_percent);
    }

    let me = all.iter().find(|r| r.pid == std::process::id()).expect("self listed");
    let expected = format!("127.0.0.1:{}", port);
    assert!(me
        .sockets
        .iter()
        .any(|s| s.local_address.as_deref() == Some(expected.as_str())));

    assert!(inv
        .list(&ListQuery::new(Some("doesnotexist12345"), None, None))
        .is_empty());
}
