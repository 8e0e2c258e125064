//! Typed startup parameters for one composition root (§1 "Configuration"
//! in SPEC_FULL.md). Persistent loading is out of scope; a caller that
//! owns a config file/flash region constructs this in-process and hands
//! it to [`crate::root::CanCore::new`].

/// Construction-time parameters for [`crate::root::CanCore`]. Defaults
/// mirror the original source's literal constants.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Number of physical CAN buses to register up front (typically 3
    /// on the reference hardware; §1 "PURPOSE & SCOPE").
    pub bus_count: u32,
    /// Depth of each bus's TX queue (§4.1 `write`'s bounded queue).
    pub tx_queue_depth: usize,
    /// Depth of the router's single dispatch queue (§4.2).
    pub dispatch_queue_depth: usize,
    /// Supervisor primary tick period in milliseconds (§4.7 "Ticker").
    pub tick_ms: u32,
    /// Subdivisions of `tick_ms` that produce `Secondary` events; `0`
    /// disables secondary ticks.
    pub secondary_ticks: u32,
    /// Minimum ISO-TP consecutive-frame separation time this side
    /// requests/honours, in milliseconds (§4.5).
    pub separation_time_ms: u8,
    /// VWTP/poller keep-alive inactivity timeout in seconds; `0`
    /// disables it (§4.6, §4.8).
    pub keepalive_s: u16,
    /// Cap on `ReachedEnd` repeat-and-retry cycles for a series with
    /// `has_repeat() == true` (§4.7 step 4, `max_poll_repeat`).
    pub max_poll_repeat: u32,
    /// Upper bound on filter records a [`tcan_net::LogFilter`] or the
    /// supervisor's RX filter accepts (§3 "Log Filter").
    pub max_log_filters: usize,
    /// `Some(n)` enables the supervisor's rolling statistics window
    /// with room for `n` samples (§4.8 "Statistics (optional)").
    pub stats_capacity: Option<usize>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bus_count: 3,
            tx_queue_depth: 16,
            dispatch_queue_depth: 256,
            tick_ms: 1000,
            secondary_ticks: 0,
            separation_time_ms: 25,
            keepalive_s: 60,
            max_poll_repeat: 5,
            max_log_filters: tcan_net::CANLOG_MAX_FILTERS,
            stats_capacity: None,
        }
    }
}
