//! # Constants
//!
//! Shared constants used throughout the harness.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config`]).

/// Base address of the first redundancy group's cluster identifier (255.0.0.1)
pub const CLUSTER_ID_BASE: u32 = 0xFF00_0001;

/// Port etcd listens on for client traffic
pub const DEFAULT_ETCD_PORT: u16 = 2379;

/// etcd v2 key prefix under which IPv4 route reflectors are registered
pub const RR_V4_KEY_PREFIX: &str = "/v2/keys/calico/bgp/v1/rr_v4";

/// Default timeout for a single registration request (seconds)
pub const DEFAULT_ETCD_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Route reflector container image
pub const DEFAULT_RR_IMAGE: &str = "calico/routereflector";

/// Name given to the route reflector container on each host
pub const RR_CONTAINER_NAME: &str = "rr";

/// Image archive loaded into each host before launching the route reflector
pub const DEFAULT_RR_IMAGE_TARBALL: &str = "/code/routereflector.tar";

/// Checkout directory on the test machine; its `certs/` subdirectory is
/// mounted into route reflectors when etcd runs with TLS
pub const DEFAULT_CHECKOUT_DIR: &str = "/code";

/// Docker-in-docker image used for route reflector hosts
pub const DEFAULT_DIND_IMAGE: &str = "calico/dind:latest";

/// Address probed (never contacted) to discover the outbound local IPv4
pub const LOCAL_IP_PROBE_ADDR: &str = "8.8.8.8:80";
