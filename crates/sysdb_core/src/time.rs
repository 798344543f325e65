use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Wall-clock instant stored as microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        Self(micros)
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(MICROS_PER_SEC))
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_secs(self) -> i64 {
        self.0.div_euclid(MICROS_PER_SEC)
    }

    pub fn saturating_sub(self, age: Duration) -> Self {
        let micros = i64::try_from(age.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(micros))
    }

    pub fn saturating_add(self, delay: Duration) -> Self {
        let micros = i64::try_from(delay.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Timestamp;

    #[test]
    fn converts_between_seconds_and_micros() {
        let ts = Timestamp::from_secs(42);
        assert_eq!(ts.as_micros(), 42_000_000);
        assert_eq!(ts.as_secs(), 42);
        assert_eq!(Timestamp::from_micros(-1).as_secs(), -1);
    }

    #[test]
    fn offsets_saturate() {
        let ts = Timestamp::from_secs(10);
        assert_eq!(ts.saturating_sub(Duration::from_secs(4)), Timestamp::from_secs(6));
        assert_eq!(ts.saturating_add(Duration::from_secs(5)), Timestamp::from_secs(15));
        assert_eq!(
            Timestamp(i64::MIN).saturating_sub(Duration::from_secs(1)),
            Timestamp(i64::MIN)
        );
    }
}
