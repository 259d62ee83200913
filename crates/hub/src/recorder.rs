//! Periodic history recorder: copies the live air and water readings into
//! their history tables.
//!
//! A group (air: temperature/humidity/co2, water: temperature/ph/ec) is
//! written only when all three channels are known and at least one of them
//! changed since the group was last written.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info};

use crate::db::Db;
use crate::normalize::SensorChannel;
use crate::state::{SharedState, SystemState};

/// Per-group marker of the newest update already written.
#[derive(Debug, Default)]
struct Marks {
    air: Option<OffsetDateTime>,
    water: Option<OffsetDateTime>,
}

/// One complete group ready to be written.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GroupSample {
    values: [f64; 3],
    updated: OffsetDateTime,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the recorder loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run(shared: SharedState, db: Db, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut marks = Marks::default();

    info!(interval_sec = interval.as_secs(), "recorder started");

    loop {
        ticker.tick().await;
        record_once(&shared, &db, &mut marks).await;
    }
}

/// Returns how many rows were written.
async fn record_once(shared: &SharedState, db: &Db, marks: &mut Marks) -> usize {
    let (air, water) = {
        let st = shared.read().await;
        (
            group_sample(&st, SensorChannel::AIR, marks.air),
            group_sample(&st, SensorChannel::WATER, marks.water),
        )
    };

    let mut written = 0;

    if let Some(s) = air {
        let [temperature, humidity, co2] = s.values;
        match db
            .insert_air(s.updated.unix_timestamp(), temperature, humidity, co2)
            .await
        {
            Ok(()) => {
                marks.air = Some(s.updated);
                written += 1;
                debug!(temperature, humidity, co2, "air row recorded");
            }
            Err(e) => record_failure(shared, "air", &e).await,
        }
    }

    if let Some(s) = water {
        let [water_temperature, ph, ec] = s.values;
        match db
            .insert_water(s.updated.unix_timestamp(), water_temperature, ph, ec)
            .await
        {
            Ok(()) => {
                marks.water = Some(s.updated);
                written += 1;
                debug!(water_temperature, ph, ec, "water row recorded");
            }
            Err(e) => record_failure(shared, "water", &e).await,
        }
    }

    written
}

async fn record_failure(shared: &SharedState, group: &str, e: &anyhow::Error) {
    error!(group, "recorder: insert failed: {e:#}");
    let mut st = shared.write().await;
    st.record_error(format!("recorder: {group} insert failed: {e}"));
}

/// All three channels known and updated after `since`.
fn group_sample(
    st: &SystemState,
    channels: [SensorChannel; 3],
    since: Option<OffsetDateTime>,
) -> Option<GroupSample> {
    let mut values = [0.0; 3];
    let mut updated: Option<OffsetDateTime> = None;

    for (slot, channel) in values.iter_mut().zip(channels) {
        let s = st.sensor_state(channel);
        *slot = s.reading.value()?;
        updated = updated.max(s.last_seen);
    }

    let updated = updated?;
    match since {
        Some(prev) if updated <= prev => None,
        _ => Some(GroupSample { values, updated }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
