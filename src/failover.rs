//! Failover transport URIs and the reconnect strategy they configure.
//!
//! A URI of the form
//! `failover:(tcp://host1:port1,tcp://host2:port2)?opt1=val1&opt2=val2`
//! (parentheses optional for a single broker) parses into a
//! [`FailoverConfig`]; a [`Failover`] is the stateful iterator the
//! surrounding transport consults every time a connection attempt fails.

use core::fmt;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

/// One broker endpoint from the failover list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BrokerAddr {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port)
    }
}

/// Parsed failover URI: the broker list plus reconnect policy.
#[derive(Clone, Debug, PartialEq)]
pub struct FailoverConfig {
    pub brokers: Vec<BrokerAddr>,
    /// First retry delay in milliseconds.
    pub initial_reconnect_delay: u64,
    /// Upper bound on the retry delay in milliseconds.
    pub max_reconnect_delay: u64,
    pub use_exponential_backoff: bool,
    pub backoff_multiplier: f64,
    /// `-1` unlimited, `0` one try per broker, `N` allows N retries per
    /// broker after the initial try.
    pub max_reconnect_attempts: i64,
    /// Attempt budget before the first successful connection; `0` defers to
    /// `max_reconnect_attempts`.
    pub startup_max_reconnect_attempts: i64,
    pub randomize: bool,
    pub priority_backup: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FailoverError {
    #[error("malformed failover URI: {0}")]
    MalformedUri(String),

    #[error("unknown failover option '{0}'")]
    UnknownOption(String),

    #[error("bad value '{value}' for failover option '{option}'")]
    BadOptionValue { option: String, value: String },
}

impl FailoverError {
    /// Stable machine-readable tag; the `Display` text is advisory only.
    pub fn kind(&self) -> &'static str {
        match self {
            FailoverError::MalformedUri(_) => "malformed-uri",
            FailoverError::UnknownOption(_) => "unknown-option",
            FailoverError::BadOptionValue { .. } => "bad-option-value",
        }
    }
}

impl FailoverConfig {
    /// Parse a `failover:` URI. Errors here are fatal; nothing is retried.
    pub fn parse(uri: &str) -> Result<FailoverConfig, FailoverError> {
        let malformed = || FailoverError::MalformedUri(uri.to_string());

        let rest = uri.strip_prefix("failover:").ok_or_else(malformed)?;
        let (broker_list, options) = if let Some(inner) = rest.strip_prefix('(') {
            let (list, tail) = inner.split_once(')').ok_or_else(malformed)?;
            match tail {
                "" => (list, None),
                _ => (list, Some(tail.strip_prefix('?').ok_or_else(malformed)?)),
            }
        } else {
            match rest.split_once('?') {
                Some((list, opts)) => (list, Some(opts)),
                None => (rest, None),
            }
        };

        let mut brokers = Vec::new();
        for part in broker_list.split(',') {
            let addr = part.trim().strip_prefix("tcp://").ok_or_else(malformed)?;
            let (host, port) = addr.rsplit_once(':').ok_or_else(malformed)?;
            if host.is_empty() {
                return Err(malformed());
            }
            let port = port.parse::<u16>().map_err(|_| malformed())?;
            brokers.push(BrokerAddr {
                host: host.to_string(),
                port,
            });
        }
        if brokers.is_empty() {
            return Err(malformed());
        }

        let mut config = FailoverConfig {
            brokers,
            initial_reconnect_delay: 10,
            max_reconnect_delay: 30_000,
            use_exponential_backoff: true,
            backoff_multiplier: 2.0,
            max_reconnect_attempts: -1,
            startup_max_reconnect_attempts: 0,
            randomize: true,
            priority_backup: false,
        };
        if let Some(options) = options {
            for pair in options.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = pair.split_once('=').ok_or_else(malformed)?;
                config.apply_option(name, value)?;
            }
        }
        Ok(config)
    }

    fn apply_option(&mut self, name: &str, value: &str) -> Result<(), FailoverError> {
        fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, FailoverError> {
            value.parse().map_err(|_| FailoverError::BadOptionValue {
                option: name.to_string(),
                value: value.to_string(),
            })
        }

        match name {
            "initialReconnectDelay" => self.initial_reconnect_delay = parse(name, value)?,
            "maxReconnectDelay" => self.max_reconnect_delay = parse(name, value)?,
            "useExponentialBackOff" => self.use_exponential_backoff = parse(name, value)?,
            "backOffMultiplier" => self.backoff_multiplier = parse(name, value)?,
            "maxReconnectAttempts" => self.max_reconnect_attempts = parse(name, value)?,
            "startupMaxReconnectAttempts" => {
                self.startup_max_reconnect_attempts = parse(name, value)?
            }
            "randomize" => self.randomize = parse(name, value)?,
            "priorityBackup" => self.priority_backup = parse(name, value)?,
            _ => return Err(FailoverError::UnknownOption(name.to_string())),
        }
        Ok(())
    }
}

/// What the strategy hands the transport for its next attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// How long to wait before attempting, in milliseconds.
    pub delay_ms: u64,
}

/// Stateful broker chooser.
///
/// [`Failover::next`] yields endpoints with the current backoff delay until
/// the per-broker attempt budget is spent (`None` = no more brokers).
/// [`Failover::note_failure`] grows the delay; [`Failover::note_success`]
/// resets delay and attempt counters.
#[derive(Debug)]
pub struct Failover {
    config: FailoverConfig,
    /// Broker order for the current pass; reshuffled per pass when
    /// `randomize` is on.
    order: Vec<usize>,
    cursor: usize,
    /// Endpoint hand-outs per broker since the last success.
    handouts: Vec<u32>,
    delay: u64,
    connected_once: bool,
}

impl Failover {
    pub fn new(config: FailoverConfig) -> Failover {
        let brokers = config.brokers.len();
        let mut failover = Failover {
            config,
            order: Vec::new(),
            cursor: 0,
            handouts: vec![0; brokers],
            delay: 0,
            connected_once: false,
        };
        failover.begin_pass();
        failover
    }

    /// Parse `uri` and build the strategy in one step.
    pub fn from_uri(uri: &str) -> Result<Failover, FailoverError> {
        Ok(Failover::new(FailoverConfig::parse(uri)?))
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// The next endpoint to try, with the delay to sleep first, or `None`
    /// once every broker's attempt budget is spent.
    pub fn next(&mut self) -> Option<Endpoint> {
        let limit = self.attempt_limit();
        // One full scan over the list is enough to know nothing is eligible.
        for _ in 0..self.config.brokers.len() {
            if self.cursor >= self.order.len() {
                self.begin_pass();
            }
            let index = self.order[self.cursor];
            self.cursor += 1;
            if limit.is_none_or(|l| self.handouts[index] < l) {
                self.handouts[index] += 1;
                let broker = &self.config.brokers[index];
                debug!(broker = %broker, delay_ms = self.delay, "next endpoint");
                return Some(Endpoint {
                    host: broker.host.clone(),
                    port: broker.port,
                    delay_ms: self.delay,
                });
            }
        }
        None
    }

    /// The connection attempt succeeded: reset backoff and attempt budgets.
    pub fn note_success(&mut self) {
        self.delay = 0;
        self.connected_once = true;
        self.handouts.fill(0);
    }

    /// The connection attempt failed: grow the backoff for the next hand-out.
    pub fn note_failure(&mut self) {
        let config = &self.config;
        self.delay = if self.delay == 0 {
            config.initial_reconnect_delay
        } else if config.use_exponential_backoff {
            (self.delay as f64 * config.backoff_multiplier) as u64
        } else {
            self.delay
        };
        self.delay = self.delay.min(config.max_reconnect_delay);
    }

    /// Hand-outs allowed per broker under the active budget, `None` being
    /// unlimited. Before the first success a non-zero startup budget takes
    /// precedence.
    fn attempt_limit(&self) -> Option<u32> {
        let raw = if !self.connected_once && self.config.startup_max_reconnect_attempts != 0 {
            self.config.startup_max_reconnect_attempts
        } else {
            self.config.max_reconnect_attempts
        };
        match raw {
            n if n < 0 => None,
            0 => Some(1),
            n => Some(1 + n as u32),
        }
    }

    fn begin_pass(&mut self) {
        self.order = (0..self.config.brokers.len()).collect();
        if self.config.randomize {
            self.order.shuffle(&mut rand::thread_rng());
        }
        if self.config.priority_backup {
            if let Some(primary) = self.order.iter().position(|&i| i == 0) {
                self.order.swap(0, primary);
            }
        }
        self.cursor = 0;
    }
}
