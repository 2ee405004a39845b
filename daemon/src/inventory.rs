//! Inventory assembly: merge process records with socket ownership, filter, sort

use crate::collector::{ProcessCollector, ProcessRecord};
use crate::sockets::SocketCorrelator;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Cpu,
    Mem,
    Pid,
    Name,
}

impl SortKey {
    /// Unknown or empty keys sort by CPU.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("mem") => SortKey::Mem,
            Some("pid") => SortKey::Pid,
            Some("name") => SortKey::Name,
            _ => SortKey::Cpu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Anything but `asc` is descending.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: String,
    pub sort: SortKey,
    pub order: SortOrder,
}

impl ListQuery {
    pub fn new(filter: Option<&str>, sort: Option<&str>, order: Option<&str>) -> Self {
        Self {
            filter: filter.unwrap_or_default().trim().to_lowercase(),
            sort: SortKey::parse(sort),
            order: SortOrder::parse(order),
        }
    }
}

/// Case-insensitive match against pid, name, arguments and owner.
/// `needle` must already be lowercased.
pub fn matches_filter(record: &ProcessRecord, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let haystack = format!(
        "{} {} {} {}",
        record.pid,
        record.name,
        record.command_line.join(" "),
        record.owner
    )
    .to_lowercase();
    haystack.contains(needle)
}

fn compare(a: &ProcessRecord, b: &ProcessRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Cpu => a.cpu_percent.total_cmp(&b.cpu_percent),
        SortKey::Mem => a.resident_memory_bytes.cmp(&b.resident_memory_bytes),
        SortKey::Pid => a.pid.cmp(&b.pid),
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    }
}

/// Stable sort, so equal keys keep enumeration order.
pub fn sort_records(records: &mut [ProcessRecord], key: SortKey, order: SortOrder) {
    match order {
        SortOrder::Asc => records.sort_by(|a, b| compare(a, b, key)),
        SortOrder::Desc => records.sort_by(|a, b| compare(b, a, key)),
    }
}

pub struct Inventory<C, S> {
    collector: C,
    correlator: S,
}

impl<C: ProcessCollector, S: SocketCorrelator> Inventory<C, S> {
    pub fn new(collector: C, correlator: S) -> Self {
        Self {
            collector,
            correlator,
        }
    }

    pub fn list(&self, query: &ListQuery) -> Vec<ProcessRecord> {
        let mut sockets = self.correlator.correlate();
        let mut records: Vec<ProcessRecord> = self
            .collector
            .enumerate()
            .filter(|record| matches_filter(record, &query.filter))
            .map(|mut record| {
                record.sockets = sockets.remove(&record.pid).unwrap_or_default();
                record
            })
            .collect();
        sort_records(&mut records, query.sort, query.order);
        debug!(
            "Listed {} processes (filter={:?}, sort={:?}, order={:?})",
            records.len(),
            query.filter,
            query.sort,
            query.order
        );
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_defaults_to_cpu() {
        assert_eq!(SortKey::parse(None), SortKey::Cpu);
        assert_eq!(SortKey::parse(Some("")), SortKey::Cpu);
        assert_eq!(SortKey::parse(Some("bogus")), SortKey::Cpu);
        assert_eq!(SortKey::parse(Some("MEM")), SortKey::Mem);
        assert_eq!(SortKey::parse(Some("name")), SortKey::Name);
    }

    #[test]
    fn test_sort_order_defaults_to_desc() {
        assert_eq!(SortOrder::parse(None), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("ascending")), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("asc")), SortOrder::Asc);
    }

    #[test]
    fn test_list_query_normalizes_filter() {
        let query = ListQuery::new(Some("  NGINX "), None, None);
        assert_eq!(query.filter, "nginx");
    }
}
