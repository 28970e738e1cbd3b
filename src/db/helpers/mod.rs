use std::{convert::TryFrom, time::Duration};

use anyhow::{anyhow, Result};

use crate::models::Source;

pub fn duration_to_ms(value: Duration) -> Result<i64> {
    i64::try_from(value.as_millis())
        .map_err(|_| anyhow!("interval {value:?} exceeds SQLite INTEGER range"))
}

pub fn ms_to_duration(value: i64, field: &str) -> Result<Duration> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_source(value: &str) -> Result<Source> {
    value
        .parse::<Source>()
        .map_err(|err| anyhow!("stored row has {err}"))
}
