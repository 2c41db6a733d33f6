use std::collections::VecDeque;

use dashmap::DashMap;

use super::partition::PartitionKey;

pub const DEFAULT_LOGIN_PERMIT_LIMIT: u32 = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u32 = 900;
pub const DEFAULT_REFRESH_PERMIT_LIMIT: u32 = 10;
pub const DEFAULT_REFRESH_WINDOW_SECS: u32 = 600;
pub const DEFAULT_REGISTRATION_PERMIT_LIMIT: u32 = 3;
pub const DEFAULT_REGISTRATION_WINDOW_SECS: u32 = 3600;
pub const DEFAULT_GLOBAL_PERMIT_LIMIT: u32 = 100;
pub const DEFAULT_GLOBAL_WINDOW_SECS: u32 = 60;
pub const DEFAULT_GLOBAL_SEGMENTS_PER_WINDOW: u32 = 8;

const GLOBAL_POLICY: &str = "global";
const FIXED_WINDOW_ALGORITHM: &str = "fixed-window";
const SLIDING_WINDOW_ALGORITHM: &str = "sliding-window";

/// Named fixed-window policies guarding the sensitive routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PolicyName {
    Login,
    RefreshToken,
    Registration,
}

impl PolicyName {
    #[must_use]
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::RefreshToken => "refresh-token",
            Self::Registration => "registration",
        }
    }
}

/// Per-route admission tag, attached at route-registration time. A route
/// carrying a named policy is throttled by that policy alone; everything
/// else falls under the global sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutePolicy {
    Named(PolicyName),
    Global,
}

#[derive(Debug, Clone, Copy)]
pub struct FixedWindowPolicy {
    pub permit_limit: u32,
    pub window_secs: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SlidingWindowPolicy {
    pub permit_limit: u32,
    pub window_secs: u32,
    pub segments_per_window: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub login: FixedWindowPolicy,
    pub refresh_token: FixedWindowPolicy,
    pub registration: FixedWindowPolicy,
    pub global: SlidingWindowPolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login: FixedWindowPolicy {
                permit_limit: DEFAULT_LOGIN_PERMIT_LIMIT,
                window_secs: DEFAULT_LOGIN_WINDOW_SECS,
            },
            refresh_token: FixedWindowPolicy {
                permit_limit: DEFAULT_REFRESH_PERMIT_LIMIT,
                window_secs: DEFAULT_REFRESH_WINDOW_SECS,
            },
            registration: FixedWindowPolicy {
                permit_limit: DEFAULT_REGISTRATION_PERMIT_LIMIT,
                window_secs: DEFAULT_REGISTRATION_WINDOW_SECS,
            },
            global: SlidingWindowPolicy {
                permit_limit: DEFAULT_GLOBAL_PERMIT_LIMIT,
                window_secs: DEFAULT_GLOBAL_WINDOW_SECS,
                segments_per_window: DEFAULT_GLOBAL_SEGMENTS_PER_WINDOW,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rejection {
    pub(crate) policy: &'static str,
    pub(crate) algorithm: &'static str,
    pub(crate) permit_limit: u32,
    pub(crate) window_secs: u32,
    pub(crate) retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Admitted,
    Rejected(Rejection),
}

#[derive(Debug)]
struct FixedWindowState {
    window_start_unix: i64,
    count: u32,
}

#[derive(Debug, Clone, Copy)]
struct SegmentCell {
    index: i64,
    count: u32,
}

#[derive(Debug, Default)]
struct SlidingWindowState {
    segments: VecDeque<SegmentCell>,
}

/// Partitioned admission controller. One instance per process, constructed
/// at startup and handed to request handling by reference.
///
/// Partition state lives in sharded concurrent maps; a single key's window
/// counters mutate under that key's entry lock, so two same-partition racers
/// can never both slip past the limit, and distinct partitions never block
/// each other beyond shard granularity. Window expiry is evaluated lazily on
/// the next request touching a partition; no background timer exists.
pub(crate) struct RateLimiter {
    enabled: bool,
    settings: RateLimitSettings,
    fixed_partitions: DashMap<(PolicyName, String), FixedWindowState>,
    sliding_partitions: DashMap<String, SlidingWindowState>,
}

impl RateLimiter {
    /// Builds the limiter, or a disabled stand-in when the settings fail
    /// validation. Disabled means every request is admitted: availability
    /// over enforcement, loudly.
    pub(crate) fn new(settings: RateLimitSettings) -> Self {
        let enabled = match validate_settings(&settings) {
            Ok(()) => true,
            Err(reason) => {
                tracing::error!(
                    event = "rate_limit.config_invalid",
                    reason = %reason,
                    "rate limiting disabled: invalid policy configuration"
                );
                false
            }
        };
        Self {
            enabled,
            settings,
            fixed_partitions: DashMap::new(),
            sliding_partitions: DashMap::new(),
        }
    }

    #[must_use]
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn try_acquire(
        &self,
        partition: &PartitionKey,
        route: RoutePolicy,
        now_unix_millis: i64,
    ) -> Decision {
        if !self.enabled || partition.is_unrestricted() {
            return Decision::Admitted;
        }
        match route {
            RoutePolicy::Named(name) => {
                self.acquire_fixed(name, partition.as_str(), now_unix_millis / 1000)
            }
            RoutePolicy::Global => self.acquire_sliding(partition.as_str(), now_unix_millis),
        }
    }

    fn fixed_policy(&self, name: PolicyName) -> FixedWindowPolicy {
        match name {
            PolicyName::Login => self.settings.login,
            PolicyName::RefreshToken => self.settings.refresh_token,
            PolicyName::Registration => self.settings.registration,
        }
    }

    fn acquire_fixed(&self, name: PolicyName, key: &str, now_unix: i64) -> Decision {
        let policy = self.fixed_policy(name);
        let window = i64::from(policy.window_secs);
        let mut entry = self
            .fixed_partitions
            .entry((name, key.to_owned()))
            .or_insert(FixedWindowState {
                window_start_unix: now_unix,
                count: 0,
            });
        let state = entry.value_mut();

        if now_unix.saturating_sub(state.window_start_unix) >= window {
            state.window_start_unix = now_unix;
            state.count = 0;
        }

        if state.count >= policy.permit_limit {
            let remaining = state.window_start_unix + window - now_unix;
            return Decision::Rejected(Rejection {
                policy: name.as_str(),
                algorithm: FIXED_WINDOW_ALGORITHM,
                permit_limit: policy.permit_limit,
                window_secs: policy.window_secs,
                retry_after_secs: u64::try_from(remaining.max(1)).unwrap_or(1),
            });
        }

        state.count += 1;
        Decision::Admitted
    }

    fn acquire_sliding(&self, key: &str, now_unix_millis: i64) -> Decision {
        let policy = self.settings.global;
        let window_millis = i64::from(policy.window_secs) * 1000;
        let segment_millis = window_millis / i64::from(policy.segments_per_window);
        let current_index = now_unix_millis.div_euclid(segment_millis);
        let elapsed_in_current = now_unix_millis - current_index * segment_millis;
        let boundary_index = current_index - i64::from(policy.segments_per_window);

        let mut entry = self.sliding_partitions.entry(key.to_owned()).or_default();
        let state = entry.value_mut();

        while let Some(front) = state.segments.front() {
            if front.index < boundary_index {
                state.segments.pop_front();
            } else {
                break;
            }
        }

        // Full weight for segments inside the trailing window; the one
        // straddling its start keeps the fraction still covered, which is
        // what smooths the fixed-window boundary cliff.
        #[allow(clippy::cast_precision_loss)]
        let boundary_fraction = 1.0 - elapsed_in_current as f64 / segment_millis as f64;
        let mut weighted = 0.0_f64;
        for cell in &state.segments {
            if cell.index > boundary_index {
                weighted += f64::from(cell.count);
            } else {
                weighted += f64::from(cell.count) * boundary_fraction;
            }
        }

        if weighted >= f64::from(policy.permit_limit) {
            let until_next_segment = segment_millis - elapsed_in_current;
            let retry_after_secs = u64::try_from((until_next_segment + 999) / 1000)
                .unwrap_or(1)
                .max(1);
            return Decision::Rejected(Rejection {
                policy: GLOBAL_POLICY,
                algorithm: SLIDING_WINDOW_ALGORITHM,
                permit_limit: policy.permit_limit,
                window_secs: policy.window_secs,
                retry_after_secs,
            });
        }

        match state.segments.back_mut() {
            Some(back) if back.index == current_index => back.count += 1,
            Some(back) if back.index > current_index => {
                // Clock went backwards; fold into the newest segment rather
                // than corrupting the ordering invariant.
                back.count += 1;
            }
            _ => state.segments.push_back(SegmentCell {
                index: current_index,
                count: 1,
            }),
        }
        Decision::Admitted
    }
}

fn validate_settings(settings: &RateLimitSettings) -> Result<(), String> {
    for (name, policy) in [
        ("login", settings.login),
        ("refresh-token", settings.refresh_token),
        ("registration", settings.registration),
    ] {
        if policy.permit_limit == 0 {
            return Err(format!("{name} permit limit must be positive"));
        }
        if policy.window_secs == 0 {
            return Err(format!("{name} window must be positive"));
        }
    }

    let global = settings.global;
    if global.permit_limit == 0 {
        return Err(String::from("global permit limit must be positive"));
    }
    if global.window_secs == 0 {
        return Err(String::from("global window must be positive"));
    }
    if global.segments_per_window == 0 {
        return Err(String::from("global segments per window must be positive"));
    }
    if i64::from(global.window_secs) * 1000 < i64::from(global.segments_per_window) {
        return Err(String::from("global window too short for its segment count"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        Decision, FixedWindowPolicy, PolicyName, RateLimitSettings, RateLimiter, RoutePolicy,
        SlidingWindowPolicy,
    };
    use crate::server::partition::PartitionKey;
    use axum::http::HeaderMap;

    fn partition(origin: &str) -> PartitionKey {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", origin.parse().expect("valid header"));
        crate::server::partition::resolve_partition_key(None, &headers, None)
            .expect("origin resolves")
    }

    fn limiter_with(settings: RateLimitSettings) -> RateLimiter {
        RateLimiter::new(settings)
    }

    fn small_login_limiter(permit_limit: u32, window_secs: u32) -> RateLimiter {
        limiter_with(RateLimitSettings {
            login: FixedWindowPolicy {
                permit_limit,
                window_secs,
            },
            ..RateLimitSettings::default()
        })
    }

    const LOGIN: RoutePolicy = RoutePolicy::Named(PolicyName::Login);

    #[test]
    fn fixed_window_admits_exactly_the_permit_limit() {
        let limiter = small_login_limiter(5, 900);
        let key = partition("203.0.113.5");
        let now = 1_000_000;

        for _ in 0..5 {
            assert_eq!(limiter.try_acquire(&key, LOGIN, now), Decision::Admitted);
        }
        let Decision::Rejected(rejection) = limiter.try_acquire(&key, LOGIN, now) else {
            panic!("sixth request in the window should be rejected");
        };
        assert_eq!(rejection.policy, "login");
        assert_eq!(rejection.algorithm, "fixed-window");
        assert_eq!(rejection.permit_limit, 5);
        assert_eq!(rejection.retry_after_secs, 900);
    }

    #[test]
    fn fixed_window_resets_after_the_window_elapses() {
        let limiter = small_login_limiter(2, 60);
        let key = partition("203.0.113.6");
        let now = 5_000_000;

        assert_eq!(limiter.try_acquire(&key, LOGIN, now), Decision::Admitted);
        assert_eq!(limiter.try_acquire(&key, LOGIN, now), Decision::Admitted);
        assert!(matches!(
            limiter.try_acquire(&key, LOGIN, now),
            Decision::Rejected(_)
        ));

        let after_window = now + 60 * 1000;
        assert_eq!(
            limiter.try_acquire(&key, LOGIN, after_window),
            Decision::Admitted
        );
    }

    #[test]
    fn distinct_partitions_never_influence_each_other() {
        let limiter = small_login_limiter(1, 900);
        let now = 42_000;

        assert_eq!(
            limiter.try_acquire(&partition("198.51.100.1"), LOGIN, now),
            Decision::Admitted
        );
        assert!(matches!(
            limiter.try_acquire(&partition("198.51.100.1"), LOGIN, now),
            Decision::Rejected(_)
        ));
        assert_eq!(
            limiter.try_acquire(&partition("198.51.100.2"), LOGIN, now),
            Decision::Admitted
        );
    }

    #[test]
    fn named_policies_do_not_share_counters() {
        let limiter = limiter_with(RateLimitSettings {
            login: FixedWindowPolicy {
                permit_limit: 1,
                window_secs: 900,
            },
            refresh_token: FixedWindowPolicy {
                permit_limit: 1,
                window_secs: 900,
            },
            ..RateLimitSettings::default()
        });
        let key = partition("198.51.100.3");
        let now = 42_000;

        assert_eq!(limiter.try_acquire(&key, LOGIN, now), Decision::Admitted);
        assert_eq!(
            limiter.try_acquire(&key, RoutePolicy::Named(PolicyName::RefreshToken), now),
            Decision::Admitted
        );
        assert!(matches!(
            limiter.try_acquire(&key, LOGIN, now),
            Decision::Rejected(_)
        ));
    }

    fn sliding_limiter(permit_limit: u32, window_secs: u32, segments: u32) -> RateLimiter {
        limiter_with(RateLimitSettings {
            global: SlidingWindowPolicy {
                permit_limit,
                window_secs,
                segments_per_window: segments,
            },
            ..RateLimitSettings::default()
        })
    }

    #[test]
    fn sliding_window_never_rejects_an_even_spread_of_the_permit_limit() {
        let limiter = sliding_limiter(8, 8, 8);
        let key = partition("203.0.113.9");
        let start = 10_000_000;

        for step in 0..8 {
            let now = start + step * 1000;
            assert_eq!(
                limiter.try_acquire(&key, RoutePolicy::Global, now),
                Decision::Admitted,
                "evenly spread request {step} should be admitted"
            );
        }
    }

    #[test]
    fn sliding_window_rejects_a_burst_concentrated_in_one_segment() {
        let limiter = sliding_limiter(5, 8, 8);
        let key = partition("203.0.113.10");
        let now = 20_000_000;

        for _ in 0..5 {
            assert_eq!(
                limiter.try_acquire(&key, RoutePolicy::Global, now),
                Decision::Admitted
            );
        }
        let Decision::Rejected(rejection) = limiter.try_acquire(&key, RoutePolicy::Global, now)
        else {
            panic!("burst past the permit limit should be rejected");
        };
        assert_eq!(rejection.policy, "global");
        assert_eq!(rejection.algorithm, "sliding-window");
        assert!(rejection.retry_after_secs >= 1);
    }

    #[test]
    fn sliding_window_recovers_once_the_burst_slides_out() {
        let limiter = sliding_limiter(3, 4, 4);
        let key = partition("203.0.113.11");
        let now = 30_000_000;

        for _ in 0..3 {
            assert_eq!(
                limiter.try_acquire(&key, RoutePolicy::Global, now),
                Decision::Admitted
            );
        }
        assert!(matches!(
            limiter.try_acquire(&key, RoutePolicy::Global, now),
            Decision::Rejected(_)
        ));

        let after_window = now + 5 * 1000;
        assert_eq!(
            limiter.try_acquire(&key, RoutePolicy::Global, after_window),
            Decision::Admitted
        );
    }

    #[test]
    fn boundary_burst_cannot_double_the_effective_limit() {
        // Fill the limit at the very end of one window; the next window's
        // first instant still sees nearly all of that weight.
        let limiter = sliding_limiter(4, 4, 4);
        let key = partition("203.0.113.12");
        let end_of_window = 40_000_000 + 3_900;

        for _ in 0..4 {
            assert_eq!(
                limiter.try_acquire(&key, RoutePolicy::Global, end_of_window),
                Decision::Admitted
            );
        }
        let just_after_boundary = 40_000_000 + 4_100;
        assert!(matches!(
            limiter.try_acquire(&key, RoutePolicy::Global, just_after_boundary),
            Decision::Rejected(_)
        ));
    }

    #[test]
    fn invalid_configuration_disables_limiting_entirely() {
        let limiter = limiter_with(RateLimitSettings {
            login: FixedWindowPolicy {
                permit_limit: 0,
                window_secs: 900,
            },
            ..RateLimitSettings::default()
        });
        assert!(!limiter.is_enabled());

        let key = partition("203.0.113.13");
        for _ in 0..100 {
            assert_eq!(limiter.try_acquire(&key, LOGIN, 50_000), Decision::Admitted);
        }
    }

    #[test]
    fn unrestricted_partition_is_always_admitted() {
        let limiter = small_login_limiter(1, 900);
        let key = PartitionKey::unrestricted();
        for _ in 0..10 {
            assert_eq!(limiter.try_acquire(&key, LOGIN, 60_000), Decision::Admitted);
        }
    }
}
