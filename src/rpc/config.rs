use std::time::Duration;

use crate::common::MAX_BUCKET_SIZE_K;

/// Protocol id the DHT streams are negotiated under.
pub const DEFAULT_PROTOCOL_ID: &str = "/ipfs/kad/1.0.0";
/// Number of peers queried in parallel per lookup round.
pub const DEFAULT_ALPHA: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RECORD_VALIDITY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_PUBLISH_ROUNDS: usize = 10;
pub const DEFAULT_PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Protocol id outbound streams are dialled with. Inbound streams opened
    /// under any other id are refused.
    ///
    /// Defaults to [DEFAULT_PROTOCOL_ID]
    pub protocol_id: String,
    /// Number of closest peers provider and name records are replicated to.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub replication: usize,
    /// Number of peers queried concurrently in each lookup round.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
    /// Number of closest peers returned when answering requests.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub closest_peers: usize,
    /// Maximum contacts per routing table bucket.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub bucket_size: usize,
    /// Timeout of dialling a peer and getting its response.
    ///
    /// The longer this duration is, the longer lookups take when peers are unresponsive.
    /// The shorter it is, the more responses from busy peers we miss out on,
    /// which affects the accuracy of lookups trying to find closest peers to a key.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Timeout of a single provider query, shorter than [Config::request_timeout].
    ///
    /// Defaults to [DEFAULT_PROVIDER_REQUEST_TIMEOUT]
    pub provider_request_timeout: Duration,
    /// Timeout of dialling a bootstrap peer.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_TIMEOUT]
    pub bootstrap_timeout: Duration,
    /// Interval between two runs of the periodic bootstrap task.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_INTERVAL]
    pub bootstrap_interval: Duration,
    /// How long a published name record stays valid.
    ///
    /// Defaults to [DEFAULT_RECORD_VALIDITY]
    pub record_validity: Duration,
    /// Maximum closest-peer searches while publishing a record, before giving up.
    ///
    /// Defaults to [DEFAULT_MAX_PUBLISH_ROUNDS]
    pub max_publish_rounds: usize,
    /// Delay between two publishing rounds.
    ///
    /// Defaults to [DEFAULT_PUBLISH_RETRY_DELAY]
    pub publish_retry_delay: Duration,
    /// Dial every address, including loopback and private ones.
    ///
    /// Defaults to `false`, where only publicly routable addresses are dialled.
    pub local_dht: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
            replication: MAX_BUCKET_SIZE_K,
            alpha: DEFAULT_ALPHA,
            closest_peers: MAX_BUCKET_SIZE_K,
            bucket_size: MAX_BUCKET_SIZE_K,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            provider_request_timeout: DEFAULT_PROVIDER_REQUEST_TIMEOUT,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            bootstrap_interval: DEFAULT_BOOTSTRAP_INTERVAL,
            record_validity: DEFAULT_RECORD_VALIDITY,
            max_publish_rounds: DEFAULT_MAX_PUBLISH_ROUNDS,
            publish_retry_delay: DEFAULT_PUBLISH_RETRY_DELAY,
            local_dht: false,
        }
    }
}
