//! Fixed names and addresses for deterministic tests.

// Clusters
pub const CLUSTER_A: &str = "cluster-a";
pub const CLUSTER_B: &str = "cluster-b";
pub const CLUSTER_C: &str = "cluster-c";

// Display colors (ANSI SGR background codes)
pub const COLOR_A: &str = "44";
pub const COLOR_B: &str = "45";
pub const COLOR_C: &str = "46";

// Namespaces
pub const NS_DEFAULT: &str = "default";
pub const NS_WEB: &str = "web";

// Pods
pub const POD_A1: &str = "p1";
pub const POD_B1: &str = "p2";
pub const POD_A1_IP: &str = "10.1.0.9";
pub const POD_B1_IP: &str = "10.2.0.5";

// Services
pub const SVC_B1: &str = "s2";
pub const SVC_B1_IP: &str = "10.96.0.10";

/// CIDR cluster A targets to reach cluster B's pods.
pub const ROUTE_A_TO_B: &str = "10.1.0.0/16";

/// `POD_B1_IP` as seen from cluster A.
pub const POD_B1_IP_FROM_A: &str = "10.1.0.5";

// Default external endpoints
pub const EXTERNAL_INTERNET: &str = "internet";
pub const EXTERNAL_NAMESERVER: &str = "nameserver";
pub const EXTERNAL_ADDRESS: &str = "8.8.8.8";

/// Node every regular fixture pod is scheduled on.
pub const WORKER_NODE: &str = "worker";

/// Virtual node standing in for a peer cluster.
pub const VIRTUAL_NODE: &str = "liqo-virtual";
