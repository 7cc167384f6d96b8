use embassy_futures::select::{Either, select};
use embassy_time::Ticker;
use servo_core::task::PeriodicTask;

use super::{BoardController, CONFIG_UPDATES};
use crate::status;
use crate::time::{FirmwareInstant, to_embassy};

/// Runs the control tick at the configured period and applies configuration updates between ticks.
#[embassy_executor::task]
pub async fn run(controller: &'static mut BoardController) -> ! {
    let mut ticker = Ticker::every(to_embassy(controller.period()));
    defmt::info!("servo task started");

    loop {
        match select(ticker.next(), CONFIG_UPDATES.wait()).await {
            Either::First(()) => {
                controller.run(FirmwareInstant::now());
                status::publish(controller.telemetry());
            }
            Either::Second(config) => {
                controller.on_configuration_change(Some(config));
                ticker = Ticker::every(to_embassy(controller.period()));
            }
        }
    }
}
