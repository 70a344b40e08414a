use std::time::Duration;

use tracing::{error, info};

use super::{csv_log::CsvLog, record::SensorRecord};
use crate::{
    clock::Clock,
    solar::{next_sleep_seconds, Location, SolarWindow},
    tuya::{token::TokenManager, Transport, TuyaClient, TuyaError},
};

/// Delay after a failed device poll. Failed polls never consult the schedule.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(15);

/// What the loop does after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Sleep(Duration),
    Terminate,
}

/// Drives token check → device fetch → CSV append → schedule decision.
///
/// The solar window is fixed at construction; a process that runs past
/// midnight keeps using the window of the day it started on.
pub struct Poller<T, C> {
    client: TuyaClient<T>,
    tokens: TokenManager,
    clock: C,
    log: CsvLog,
    location: Location,
    window: SolarWindow,
}

impl<T: Transport, C: Clock> Poller<T, C> {
    pub fn new(
        client: TuyaClient<T>,
        tokens: TokenManager,
        clock: C,
        log: CsvLog,
        location: Location,
        window: SolarWindow,
    ) -> Self {
        Self { client, tokens, clock, log, location, window }
    }

    /// Polls until the solar window is exhausted. Only a token failure that
    /// outlasts the retry budget ends the loop with an error.
    pub async fn run(&mut self) -> Result<(), TuyaError> {
        info!(
            device_id = %self.client.device_id(),
            sunrise = %self.window.sunrise.with_timezone(&self.location.timezone),
            sunset = %self.window.sunset.with_timezone(&self.location.timezone),
            "Sensor polling loop started"
        );

        loop {
            match self.step().await? {
                Step::Sleep(duration) => self.clock.sleep(duration).await,
                Step::Terminate => {
                    info!("Solar window elapsed; polling finished");
                    return Ok(());
                }
            }
        }
    }

    /// One iteration of the loop.
    pub async fn step(&mut self) -> Result<Step, TuyaError> {
        let token = self.tokens.ensure_valid(&self.client, &self.clock).await?;

        let (t, details) = match self.client.device_details(&token, self.clock.now()).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    device_id = %self.client.device_id(),
                    error = %e,
                    "Polling device failed; retrying in {}s",
                    POLL_RETRY_DELAY.as_secs()
                );
                return Ok(Step::Sleep(POLL_RETRY_DELAY));
            }
        };

        let online = details.online;
        let record = SensorRecord::from_device(t, details);
        let now = self.clock.now();
        match self.log.append(&record, self.location.today(now)).await {
            Ok(path) => info!(path = %path.display(), online, t, "Sensor record appended"),
            Err(e) => error!(error = %format!("{e:#}"), "Failed to append sensor record"),
        }

        Ok(match u64::try_from(next_sleep_seconds(now, &self.window)) {
            Ok(secs) => Step::Sleep(Duration::from_secs(secs)),
            Err(_) => Step::Terminate,
        })
    }
}
