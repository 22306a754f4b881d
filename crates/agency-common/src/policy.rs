use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// The endpoint classes that each get their own rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyName {
    Contact,
    Upload,
    Api,
    Auth,
}

impl PolicyName {
    pub const ALL: [PolicyName; 4] = [
        PolicyName::Contact,
        PolicyName::Upload,
        PolicyName::Api,
        PolicyName::Auth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::Contact => "contact",
            PolicyName::Upload => "upload",
            PolicyName::Api => "api",
            PolicyName::Auth => "auth",
        }
    }

    /// Deployment defaults for each endpoint class.
    pub fn default_policy(&self) -> RatePolicy {
        match self {
            PolicyName::Contact => RatePolicy::CONTACT,
            PolicyName::Upload => RatePolicy::UPLOAD,
            PolicyName::Api => RatePolicy::API,
            PolicyName::Auth => RatePolicy::AUTH,
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyName {
    type Err = CommonError;

    fn from_str(s: &str) -> CommonResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" => Ok(PolicyName::Contact),
            "upload" => Ok(PolicyName::Upload),
            "api" => Ok(PolicyName::Api),
            "auth" => Ok(PolicyName::Auth),
            _ => Err(CommonError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Fixed-window limit: at most `max_requests` per `window_ms` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RatePolicy {
    pub const CONTACT: RatePolicy = RatePolicy {
        max_requests: 3,
        window_ms: 60_000,
    };
    pub const UPLOAD: RatePolicy = RatePolicy {
        max_requests: 10,
        window_ms: 60_000,
    };
    pub const API: RatePolicy = RatePolicy {
        max_requests: 30,
        window_ms: 60_000,
    };
    pub const AUTH: RatePolicy = RatePolicy {
        max_requests: 5,
        window_ms: 900_000,
    };

    /// Build a policy, rejecting a zero limit or a zero-length window.
    pub fn new(max_requests: u32, window_ms: u64) -> CommonResult<Self> {
        if max_requests == 0 {
            return Err(CommonError::InvalidPolicy(
                "max requests must be at least 1".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(CommonError::InvalidPolicy(
                "window must be at least 1 ms".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window_ms,
        })
    }

    /// Parse the `<max_requests>/<window_ms>` form used in configuration,
    /// e.g. `3/60000`.
    pub fn parse(input: &str) -> CommonResult<Self> {
        let (max, window) = input.split_once('/').ok_or_else(|| {
            CommonError::InvalidPolicy(format!("expected <max>/<window_ms>, got {input:?}"))
        })?;

        let max_requests: u32 = max
            .trim()
            .parse()
            .map_err(|_| CommonError::InvalidPolicy(format!("invalid max requests {max:?}")))?;
        let window_ms: u64 = window
            .trim()
            .parse()
            .map_err(|_| CommonError::InvalidPolicy(format!("invalid window {window:?}")))?;

        Self::new(max_requests, window_ms)
    }
}

impl fmt::Display for RatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.window_ms)
    }
}
