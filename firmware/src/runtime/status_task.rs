use embassy_time::{Duration, Ticker};

use crate::peers;
use crate::status;

const INTERVAL: Duration = Duration::from_secs(1);

/// Logs the published servo status once a second.
#[embassy_executor::task]
pub async fn run() -> ! {
    let mut ticker = Ticker::every(INTERVAL);
    loop {
        ticker.next().await;
        let status = status::snapshot();
        defmt::info!(
            "servo {} faults={=u8:08b} pos={} target={} current={}A etb_mode={} failsafe={} ({}) etb_target={}",
            status.state,
            status.faults.bits(),
            status.position,
            status.target,
            status.motor_current,
            status.etb_mode,
            status.failsafe_active,
            status.failsafe_count,
            peers::etb_target(),
        );
    }
}
