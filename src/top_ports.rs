//! Port priority list and registered service names

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Ports probed ahead of everything else, in this order.
pub const COMMON_PORTS: [u16; 18] = [
    21, 22, 23, 25, 53, 80, 110, 143, 443, 445, 3306, 3389, 5432, 5900, 8080, 8443, 27017, 6379,
];

/// Confidence attached to a service name inferred from the port number alone.
pub const PORT_HINT_CONFIDENCE: f64 = 0.3;

/// Registered (well-known) service names by port number.
static REGISTERED_SERVICES: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (20, "ftp-data"),
        (21, "ftp"),
        (22, "ssh"),
        (23, "telnet"),
        (25, "smtp"),
        (53, "dns"),
        (67, "dhcp"),
        (69, "tftp"),
        (80, "http"),
        (88, "kerberos"),
        (110, "pop3"),
        (111, "rpcbind"),
        (123, "ntp"),
        (135, "msrpc"),
        (137, "netbios-ns"),
        (139, "netbios-ssn"),
        (143, "imap"),
        (161, "snmp"),
        (389, "ldap"),
        (443, "https"),
        (445, "microsoft-ds"),
        (465, "smtps"),
        (514, "syslog"),
        (587, "submission"),
        (631, "ipp"),
        (636, "ldaps"),
        (873, "rsync"),
        (993, "imaps"),
        (995, "pop3s"),
        (1433, "mssql"),
        (1521, "oracle"),
        (1883, "mqtt"),
        (1900, "ssdp"),
        (2049, "nfs"),
        (2375, "docker"),
        (3000, "http"),
        (3306, "mysql"),
        (3389, "rdp"),
        (5060, "sip"),
        (5432, "postgresql"),
        (5672, "amqp"),
        (5900, "vnc"),
        (6379, "redis"),
        (8000, "http"),
        (8080, "http-proxy"),
        (8443, "https-alt"),
        (9000, "http"),
        (9200, "elasticsearch"),
        (11211, "memcached"),
        (27017, "mongodb"),
    ])
});

/// Registered service name for a port, if any
pub fn service_for_port(port: u16) -> Option<&'static str> {
    REGISTERED_SERVICES.get(&port).copied()
}

/// Order in which the given (ascending) ports are scheduled.
///
/// With prioritisation the common ports present in `ports` come first, in
/// list order, followed by the rest ascending.
pub fn priority_order(ports: &[u16], prioritize: bool) -> Vec<u16> {
    let mut remaining: Vec<u16> = ports.to_vec();
    remaining.sort_unstable();
    remaining.dedup();
    if !prioritize {
        return remaining;
    }

    let requested: HashSet<u16> = remaining.iter().copied().collect();
    let mut ordered: Vec<u16> = COMMON_PORTS
        .iter()
        .copied()
        .filter(|p| requested.contains(p))
        .collect();
    let front: HashSet<u16> = ordered.iter().copied().collect();
    ordered.extend(remaining.into_iter().filter(|p| !front.contains(p)));
    ordered
}
